//! Error types for event operations.

use thiserror::Error;
use visionaid_models::MalformedEventError;
use visionaid_persistence::PersistenceError;

use crate::reaction::ReactionError;

/// Errors that can occur on the event path.
#[derive(Error, Debug)]
pub enum EventError {
    /// Payload did not match the event envelope.
    #[error("malformed event: {0}")]
    Malformed(#[from] MalformedEventError),

    /// Bus connection failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Event log failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// An agent-specific reaction rule failed.
    #[error("reaction failed: {0}")]
    Reaction(#[from] ReactionError),

    /// Could not encode a record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
