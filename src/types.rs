//! Shared error and result types.

use thiserror::Error;

/// Errors surfaced by coordinator and agent operations.
#[derive(Debug, Error)]
pub enum ForemanError {
    /// Request body or parameter failed validation
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Missing or mismatched auth token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced worker or resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Document store operation failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport-level failure while pushing routes to a broadcaster.
    /// Aborts the dispatch attempt outright; a non-200 response does not.
    #[error("broadcaster communication failed: {0}")]
    BroadcasterCommunication(String),

    /// Pairing handshake with the coordinator failed
    #[error("pairing failed: {0}")]
    Pairing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForemanError>;
