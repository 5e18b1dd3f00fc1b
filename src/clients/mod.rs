pub mod frontend;

pub use frontend::FrontendClient;
