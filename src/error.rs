//! Error types for the chat core.

use thiserror::Error;

/// Result type for chat core operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that can occur while talking to the conversation backend or
/// driving a room session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request failed before a response was obtained, or the body broke mid-read.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("{url} returned {status}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// Response body could not be interpreted.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The chat response carried no readable body.
    #[error("Chat response has no readable body")]
    MissingBody,

    /// The stream read was cancelled because the session moved on.
    #[error("Stream cancelled")]
    Cancelled,

    /// An exchange is already open in this session.
    #[error("An exchange is already in progress")]
    Busy,

    /// Submitted text was empty or whitespace only.
    #[error("Message is empty")]
    EmptyMessage,

    /// An update arrived that does not fit the message log's shape.
    #[error("Message log ordering violated: {0}")]
    LogOrder(String),

    /// Anything else reported by a backend implementation.
    #[error("{0}")]
    Other(String),
}
