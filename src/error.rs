use thiserror::Error;

use crate::persistence::PersistenceError;

/// Everything the gateway reports back to the connection that caused it.
/// The display text is sent verbatim in a private `error` event.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Missing roomId or username")]
    MissingJoinFields,
    #[error("Message cannot be empty")]
    EmptyMessage,
    #[error("Not a member of room {0}")]
    NotMember(String),
    #[error("{0}")]
    RateLimited(&'static str),
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Failed to save room: {0}")]
    Save(#[source] PersistenceError),
    #[error("Failed to load room: {0}")]
    Load(#[source] PersistenceError),
    #[error("No saved state for room {0}")]
    NothingSaved(String),
}
