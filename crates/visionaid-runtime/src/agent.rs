//! Agent contracts.
//!
//! Every perceptual or service agent plugs into the coordinator through one
//! of two traits, chosen when it is registered:
//!
//! - [`BlockingAgent`]: `run` lasts for the agent's natural lifetime. The
//!   lifecycle manager runs it on its own task.
//! - [`DetachableAgent`]: `run_detached` starts background work and returns.
//!
//! Both must provide an idempotent `terminate` that releases every device
//! the agent holds (camera, microphone).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure inside an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not be started.
    #[error("start failed: {0}")]
    Start(String),

    /// The agent failed while running.
    #[error("run failed: {0}")]
    Run(String),

    /// The agent could not be stopped cleanly.
    #[error("terminate failed: {0}")]
    Terminate(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// Registered, never started.
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    /// Stopped, or ran to completion.
    Terminated,
}

impl AgentState {
    /// Whether the agent may currently own devices.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Starting | AgentState::Running | AgentState::Stopping)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Stopping => "stopping",
            AgentState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// How an agent's entry point behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Runs to completion.
    #[default]
    Blocking,
    /// Returns after detaching a background worker.
    Detached,
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Blocking => f.pad("blocking"),
            AgentMode::Detached => f.pad("detached"),
        }
    }
}

/// Information about a registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// Registry key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Entry point behavior.
    pub mode: AgentMode,
    /// Current lifecycle state.
    pub state: AgentState,
}

/// An agent whose `run` lasts for its whole lifetime.
///
/// `run` may be cancelled (its future dropped) when the coordinator switches
/// away; `terminate` is always called afterwards.
#[async_trait]
pub trait BlockingAgent: Send + Sync {
    /// Short description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Runs the agent until it finishes or is terminated.
    async fn run(&self) -> Result<(), AgentError>;

    /// Stops the agent and releases its devices. Must be idempotent.
    async fn terminate(&self) -> Result<(), AgentError>;
}

/// An agent that starts background work and returns immediately.
#[async_trait]
pub trait DetachableAgent: Send + Sync {
    /// Short description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Starts the background worker.
    async fn run_detached(&self) -> Result<(), AgentError>;

    /// Stops the background worker and releases its devices. Must be
    /// idempotent.
    async fn terminate(&self) -> Result<(), AgentError>;
}

/// A registered agent, tagged with its execution style.
#[derive(Clone)]
pub enum AgentHandle {
    Blocking(Arc<dyn BlockingAgent>),
    Detachable(Arc<dyn DetachableAgent>),
}

impl AgentHandle {
    /// Wraps a blocking agent.
    pub fn blocking(agent: impl BlockingAgent + 'static) -> Self {
        AgentHandle::Blocking(Arc::new(agent))
    }

    /// Wraps a detachable agent.
    pub fn detachable(agent: impl DetachableAgent + 'static) -> Self {
        AgentHandle::Detachable(Arc::new(agent))
    }

    pub fn mode(&self) -> AgentMode {
        match self {
            AgentHandle::Blocking(_) => AgentMode::Blocking,
            AgentHandle::Detachable(_) => AgentMode::Detached,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            AgentHandle::Blocking(a) => a.description(),
            AgentHandle::Detachable(a) => a.description(),
        }
    }

    /// Calls the agent's termination contract.
    pub async fn terminate(&self) -> Result<(), AgentError> {
        match self {
            AgentHandle::Blocking(a) => a.terminate().await,
            AgentHandle::Detachable(a) => a.terminate().await,
        }
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("mode", &self.mode())
            .field("description", &self.description())
            .finish()
    }
}
