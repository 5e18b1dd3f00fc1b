use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::user::{User, UserRole};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    /// Connects, creating the database file if needed, and applies migrations.
    /// A migration failure here is fatal: the caller is expected to abort
    /// startup rather than run against an unknown schema.
    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.starts_with(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn two_factor_repo(&self) -> repositories::two_factor::TwoFactorRepository {
        repositories::two_factor::TwoFactorRepository::new(self.conn.clone())
    }

    pub async fn get_user_model(&self, id: i64) -> Result<Option<crate::entities::users::Model>> {
        self.user_repo().get_model(id).await
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.user_repo().get(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list().await
    }

    pub async fn list_users_by_role(&self, role: UserRole) -> Result<Vec<User>> {
        self.user_repo().list_by_role(role).await
    }

    pub async fn grant_role(
        &self,
        chat_id: i64,
        role: UserRole,
        default_hash: String,
    ) -> Result<User> {
        self.user_repo().grant_role(chat_id, role, default_hash).await
    }

    pub async fn apply_password_change(
        &self,
        id: i64,
        new_hash: String,
        history_json: String,
    ) -> Result<()> {
        self.user_repo()
            .apply_password_change(id, new_hash, history_json)
            .await
    }

    pub async fn set_last_auth_time(&self, id: i64, timestamp: i64) -> Result<()> {
        self.user_repo().set_last_auth_time(id, timestamp).await
    }

    pub async fn user_count(&self) -> Result<u64> {
        self.user_repo().count().await
    }

    pub async fn enable_two_factor(
        &self,
        user_id: i64,
        secret: String,
        code_hashes: Vec<String>,
    ) -> Result<()> {
        self.two_factor_repo()
            .enable(user_id, secret, code_hashes)
            .await
    }

    pub async fn disable_two_factor(&self, user_id: i64) -> Result<()> {
        self.two_factor_repo().disable(user_id).await
    }

    pub async fn consume_backup_code(&self, user_id: i64, code_hash: &str) -> Result<bool> {
        self.two_factor_repo()
            .consume_backup_code(user_id, code_hash)
            .await
    }

    pub async fn remaining_backup_codes(&self, user_id: i64) -> Result<u64> {
        self.two_factor_repo().remaining_codes(user_id).await
    }
}
