use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait, sea_query::Expr,
};
use tracing::info;

use crate::entities::{backup_codes, users};

pub struct TwoFactorRepository {
    conn: DatabaseConnection,
}

impl TwoFactorRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Persist the confirmed secret, flip the enabled flag, invalidate the
    /// session, and replace all backup codes in one transaction. Nothing is
    /// persisted for a user whose confirmation never succeeded.
    pub async fn enable(
        &self,
        user_id: i64,
        secret: String,
        code_hashes: Vec<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let txn = self.conn.begin().await?;

        users::Entity::update_many()
            .col_expr(users::Column::TwoFaEnabled, Expr::value(true))
            .col_expr(users::Column::TwoFaSecret, Expr::value(Some(secret)))
            .col_expr(users::Column::LastAuthTime, Expr::value(0i64))
            .col_expr(users::Column::UpdatedAt, Expr::value(now.clone()))
            .filter(users::Column::Id.eq(user_id))
            .exec(&txn)
            .await?;

        backup_codes::Entity::delete_many()
            .filter(backup_codes::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let models: Vec<backup_codes::ActiveModel> = code_hashes
            .into_iter()
            .map(|hash| backup_codes::ActiveModel {
                user_id: Set(user_id),
                code_hash: Set(hash),
                created_at: Set(now.clone()),
                ..Default::default()
            })
            .collect();

        backup_codes::Entity::insert_many(models).exec(&txn).await?;

        txn.commit().await?;
        info!(user_id, "Two-factor enabled");
        Ok(())
    }

    /// Clear secret, flag, and every backup code; invalidate the session.
    pub async fn disable(&self, user_id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let txn = self.conn.begin().await?;

        users::Entity::update_many()
            .col_expr(users::Column::TwoFaEnabled, Expr::value(false))
            .col_expr(users::Column::TwoFaSecret, Expr::value(Option::<String>::None))
            .col_expr(users::Column::LastAuthTime, Expr::value(0i64))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(user_id))
            .exec(&txn)
            .await?;

        backup_codes::Entity::delete_many()
            .filter(backup_codes::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(user_id, "Two-factor disabled");
        Ok(())
    }

    /// Match-and-remove in a single conditional DELETE. Under concurrent
    /// submission of the same code only one caller sees a deleted row.
    pub async fn consume_backup_code(&self, user_id: i64, code_hash: &str) -> Result<bool> {
        let result = backup_codes::Entity::delete_many()
            .filter(backup_codes::Column::UserId.eq(user_id))
            .filter(backup_codes::Column::CodeHash.eq(code_hash))
            .exec(&self.conn)
            .await
            .context("Failed to consume backup code")?;

        Ok(result.rows_affected > 0)
    }

    pub async fn remaining_codes(&self, user_id: i64) -> Result<u64> {
        backup_codes::Entity::find()
            .filter(backup_codes::Column::UserId.eq(user_id))
            .count(&self.conn)
            .await
            .context("Failed to count backup codes")
    }
}
