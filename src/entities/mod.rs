pub mod prelude;

pub mod backup_codes;
pub mod users;
