//! Error taxonomy for the relay.
//!
//! Every failure is scoped to one connection or one operation; none of these
//! is fatal to the process.

use thiserror::Error;

use crate::ids::RoomId;

/// Errors from room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Join/exit/broadcast referenced a room that does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    /// The outbound message could not be encoded.
    #[error("failed to serialize room message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A required connection-establishment parameter was absent or empty.
    #[error("Param Not Found: {0}")]
    MissingParameter(&'static str),

    /// The room `command` parameter was neither `create` nor `join`.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A room operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// `create` named a room that already exists; the caller was not admitted.
    #[error("room already exists: {0}")]
    RoomAlreadyExists(RoomId),

    /// An inbound payload did not parse as the expected structure.
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// An outbound message could not be encoded.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A message arrived on a connection that is not open.
    #[error("session is not open")]
    SessionNotOpen,
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
