//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Relay message error
    #[error("Message error: {0}")]
    Message(#[from] crate::message::MessageError),

    /// Subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Already connected
    #[error("Already connected to relay")]
    AlreadyConnected,

    /// Event publish failed
    #[error("Event publish failed: {0}")]
    PublishFailed(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
