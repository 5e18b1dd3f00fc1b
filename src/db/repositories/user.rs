use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::entities::users;

/// Privileged roles. Students never appear in the users table, so there is no
/// variant for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Curator,
    Admin,
}

impl UserRole {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "curator" => Some(Self::Curator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Curator => "curator",
            Self::Admin => "admin",
        }
    }

    /// Role default password, assigned once at grant time.
    #[must_use]
    pub const fn default_password(self) -> &'static str {
        match self {
            Self::Curator => "curator",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User data returned from the repository (without hash or TOTP secret).
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub role: String,
    pub password_changed: bool,
    pub two_fa_enabled: bool,
    pub last_auth_time: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            role: model.role,
            password_changed: model.password_changed,
            two_fa_enabled: model.two_fa_enabled,
            last_auth_time: model.last_auth_time,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Full row, including hash and history. Internal to the service layer.
    pub async fn get_model(&self, id: i64) -> Result<Option<users::Model>> {
        users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by id")
    }

    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        Ok(self.get_model(id).await?.map(User::from))
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .filter(users::Column::Role.eq(role.as_str()))
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users by role")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Create the row at role-grant time, assigning the role default password.
    ///
    /// Existing rows only ever have their role updated; an account that already
    /// customized its password keeps it. An uncustomized account switching role
    /// receives the new role's default instead.
    pub async fn grant_role(
        &self,
        chat_id: i64,
        role: UserRole,
        default_hash: String,
    ) -> Result<User> {
        let now = chrono::Utc::now().to_rfc3339();

        match self.get_model(chat_id).await? {
            None => {
                let model = users::ActiveModel {
                    id: Set(chat_id),
                    role: Set(role.as_str().to_string()),
                    hashed_password: Set(Some(default_hash)),
                    password_changed: Set(false),
                    password_history: Set("[]".to_string()),
                    two_fa_enabled: Set(false),
                    two_fa_secret: Set(None),
                    last_auth_time: Set(0),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                };
                let inserted = model.insert(&self.conn).await?;
                info!(user_id = chat_id, role = %role, "Granted role with default password");
                Ok(User::from(inserted))
            }
            Some(existing) => {
                let keep_password = existing.password_changed;
                let mut active: users::ActiveModel = existing.into();
                active.role = Set(role.as_str().to_string());
                if !keep_password {
                    active.hashed_password = Set(Some(default_hash));
                }
                active.updated_at = Set(now);
                let updated = active.update(&self.conn).await?;
                info!(user_id = chat_id, role = %role, "Updated role for existing user");
                Ok(User::from(updated))
            }
        }
    }

    /// Password rotation: new hash, trimmed history, `password_changed` flip,
    /// and session invalidation land in one UPDATE so no partial credential
    /// state is ever visible.
    pub async fn apply_password_change(
        &self,
        id: i64,
        new_hash: String,
        history_json: String,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();

        users::Entity::update_many()
            .col_expr(users::Column::HashedPassword, Expr::value(Some(new_hash)))
            .col_expr(users::Column::PasswordHistory, Expr::value(history_json))
            .col_expr(users::Column::PasswordChanged, Expr::value(true))
            .col_expr(users::Column::LastAuthTime, Expr::value(0i64))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to apply password change")?;

        Ok(())
    }

    pub async fn set_last_auth_time(&self, id: i64, timestamp: i64) -> Result<()> {
        users::Entity::update_many()
            .col_expr(users::Column::LastAuthTime, Expr::value(timestamp))
            .filter(users::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to update last auth time")?;

        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        users::Entity::find()
            .count(&self.conn)
            .await
            .context("Failed to count users")
    }
}
