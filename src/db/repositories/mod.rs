pub mod two_factor;
pub mod user;
