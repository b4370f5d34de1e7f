//! Lifecycle events.

/// Events emitted by the lifecycle manager, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A switch acquired the lifecycle lock.
    TransitionStarted {
        /// Agent being switched to.
        agent: String,
    },
    /// An agent was terminated.
    AgentStopped {
        /// Agent name.
        agent: String,
    },
    /// An agent's entry point was invoked successfully.
    AgentStarted {
        /// Agent name.
        agent: String,
    },
    /// A blocking agent's run ended on its own (or hit its runtime bound).
    AgentFinished {
        /// Agent name.
        agent: String,
    },
    /// An agent failed to start, run or stop.
    AgentFailed {
        /// Agent name.
        agent: String,
        /// Error message.
        error: String,
    },
    /// A switch released the lifecycle lock.
    TransitionFinished {
        /// Agent that was switched to.
        agent: String,
        /// Whether the agent is now current.
        success: bool,
    },
}

impl LifecycleEvent {
    /// Returns the agent this event concerns.
    pub fn agent(&self) -> &str {
        match self {
            LifecycleEvent::TransitionStarted { agent }
            | LifecycleEvent::AgentStopped { agent }
            | LifecycleEvent::AgentStarted { agent }
            | LifecycleEvent::AgentFinished { agent }
            | LifecycleEvent::AgentFailed { agent, .. }
            | LifecycleEvent::TransitionFinished { agent, .. } => agent,
        }
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, LifecycleEvent::AgentFailed { .. })
    }
}
