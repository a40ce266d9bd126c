use thiserror::Error;

/// Errors raised by the chat layer
#[derive(Debug, Error)]
pub enum ChatError {
    /// The backend answered with a non-2xx status
    #[error("Request to {url} failed with status {status}")]
    Fetch { url: String, status: u16 },

    /// The request never produced a response
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Realtime transport failure (connect, handshake, socket I/O)
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound push was attempted without a live session
    #[error("Not connected to the realtime server")]
    Disconnected,

    #[error("A message handler is already registered for this session")]
    HandlerAlreadyRegistered,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("No user is logged in")]
    NotLoggedIn,

    /// Malformed Socket.IO / Engine.IO packet
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
