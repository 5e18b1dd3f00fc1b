use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Chat id from the roster; assigned externally, never autoincremented.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// "curator" or "admin". Students never get a row.
    pub role: String,

    /// Argon2id password hash. Null only between row creation and the
    /// default-password assignment that immediately follows.
    pub hashed_password: Option<String>,

    /// False while the account still uses the role default; rotation is forced
    /// until it flips.
    pub password_changed: bool,

    /// JSON array of prior password hashes, most recent last, capped at 8.
    pub password_history: String,

    pub two_fa_enabled: bool,

    /// Base32 TOTP secret; present iff `two_fa_enabled`.
    pub two_fa_secret: Option<String>,

    /// Epoch seconds of the last successful authorization; 0 means never.
    pub last_auth_time: i64,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
