// Re-export needed modules for testing
pub mod chat;
pub mod error;
pub mod models;
pub mod session;

// Re-export main types for convenience
pub use chat::ChatClient;
pub use error::ChatError;
pub use models::*;
pub use session::Session;
