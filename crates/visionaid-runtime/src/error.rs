//! Error types for the runtime crate.

use thiserror::Error;

use crate::agent::AgentError;

/// Errors reported by the lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No agent is registered under this name.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// An agent with this name is already registered.
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// Starting or stopping an agent failed.
    #[error("failed to switch to {agent}: {source}")]
    Transition {
        /// Agent being started.
        agent: String,
        /// Underlying agent failure.
        #[source]
        source: AgentError,
    },
}

/// Errors that can occur in the coordinator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Lifecycle error.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Event bus error.
    #[error("event error: {0}")]
    Event(#[from] visionaid_events::EventError),

    /// Event log error.
    #[error("persistence error: {0}")]
    Persistence(#[from] visionaid_persistence::PersistenceError),

    /// Coordinator already started.
    #[error("coordinator already started")]
    AlreadyStarted,

    /// Coordinator has been shut down.
    #[error("coordinator is shut down")]
    ShutDown,

    /// Invalid configuration or agent definitions.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
