//! Agent registry: name → handle, state and runtime bound.

use std::collections::HashMap;
use std::time::Duration;

use crate::agent::{AgentHandle, AgentInfo, AgentState};
use crate::error::{LifecycleError, LifecycleResult};

/// One registered agent.
#[derive(Debug, Clone)]
pub struct AgentSlot {
    /// The agent itself.
    pub handle: AgentHandle,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Per-agent bound on a blocking run, overriding the default.
    pub max_runtime: Option<Duration>,
}

/// Registry of agents keyed by unique name.
///
/// # Example
///
/// ```ignore
/// let mut registry = AgentRegistry::new();
/// registry.register("barcode_scanner", AgentHandle::blocking(scanner))?;
///
/// for info in registry.list() {
///     println!("{} ({})", info.name, info.state);
/// }
/// ```
#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: HashMap<String, AgentSlot>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent. Fails if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, handle: AgentHandle) -> LifecycleResult<()> {
        self.register_with_runtime(name, handle, None)
    }

    /// Registers an agent with its own maximum runtime.
    pub fn register_with_runtime(
        &mut self,
        name: impl Into<String>,
        handle: AgentHandle,
        max_runtime: Option<Duration>,
    ) -> LifecycleResult<()> {
        let name = name.into();
        if self.slots.contains_key(&name) {
            return Err(LifecycleError::DuplicateAgent(name));
        }
        self.slots.insert(
            name,
            AgentSlot {
                handle,
                state: AgentState::Idle,
                max_runtime,
            },
        );
        Ok(())
    }

    /// Gets a slot by name.
    pub fn get(&self, name: &str) -> Option<&AgentSlot> {
        self.slots.get(name)
    }

    /// The state of `name`, if registered.
    pub fn state(&self, name: &str) -> Option<AgentState> {
        self.slots.get(name).map(|s| s.state)
    }

    /// Sets the state of `name`, returning the previous one.
    pub fn set_state(&mut self, name: &str, state: AgentState) -> Option<AgentState> {
        self.slots
            .get_mut(name)
            .map(|slot| std::mem::replace(&mut slot.state, state))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }

    /// Information about every agent, sorted by name.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<_> = self
            .slots
            .iter()
            .map(|(name, slot)| AgentInfo {
                name: name.clone(),
                description: slot.handle.description().to_string(),
                mode: slot.handle.mode(),
                state: slot.state,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Returns the number of registered agents.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
