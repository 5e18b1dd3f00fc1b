pub use super::backup_codes::Entity as BackupCodes;
pub use super::users::Entity as Users;
