//! LifecycleManager - at most one active agent, with ordered transitions.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use visionaid_models::Command;
use visionaid_persistence::EventLog;
use visionaid_speech::SpeechGate;

use crate::agent::{AgentError, AgentHandle, AgentInfo, AgentState, BlockingAgent};
use crate::busy::BusyFlag;
use crate::config::RuntimeConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::event::LifecycleEvent;
use crate::registry::AgentRegistry;

/// Spoken when a switch names an agent that is not registered.
pub const UNKNOWN_AGENT_PROMPT: &str = "Unknown agent requested.";

/// The task driving the current blocking agent.
struct RunningTask {
    agent: String,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State guarded by the lifecycle lock.
#[derive(Default)]
struct Control {
    current: Option<String>,
    /// Bumped on every switch and shutdown so a stale run task never
    /// clears a newer current agent.
    generation: u64,
    running: Option<RunningTask>,
}

struct Shared {
    registry: RwLock<AgentRegistry>,
    control: Mutex<Control>,
    /// Read-only mirror of `Control::current`, written under the lock.
    current: RwLock<Option<String>>,
    busy: BusyFlag,
    speech: Arc<SpeechGate>,
    log: Arc<EventLog>,
    settle_interval: Duration,
    max_runtime: Duration,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Outcome of [`LifecycleManager::shutdown_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Agents terminated cleanly.
    pub terminated: Vec<String>,
    /// Agents whose termination failed, with the error.
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    /// True when every termination succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the registered agents and enforces at most one active agent.
///
/// All transitions run under one async lock, so `switch_to` and
/// `shutdown_all` calls are totally ordered. While a transition holds the
/// lock the [`BusyFlag`] is raised; a guard lowers it on every exit path.
///
/// A switch:
/// 1. terminates the current agent (failures are logged, never fatal),
/// 2. waits the settle interval so devices are released,
/// 3. speaks "Switched to ...",
/// 4. starts the new agent: detachable agents are awaited, blocking agents
///    run on their own task bounded by the maximum runtime.
///
/// A start failure is reported and leaves no agent current.
///
/// Cloning is cheap; clones share the same agents and lock.
#[derive(Clone)]
pub struct LifecycleManager {
    shared: Arc<Shared>,
}

impl LifecycleManager {
    /// Creates a manager with no agents.
    pub fn new(config: &RuntimeConfig, speech: Arc<SpeechGate>, log: Arc<EventLog>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(AgentRegistry::new()),
                control: Mutex::new(Control::default()),
                current: RwLock::new(None),
                busy: BusyFlag::new(),
                speech,
                log,
                settle_interval: config.settle_interval,
                max_runtime: config.max_runtime,
                events,
            }),
        }
    }

    /// Registers an agent under a unique name.
    pub fn register(&self, name: impl Into<String>, handle: AgentHandle) -> LifecycleResult<()> {
        self.register_with_runtime(name, handle, None)
    }

    /// Registers an agent with its own maximum runtime.
    pub fn register_with_runtime(
        &self,
        name: impl Into<String>,
        handle: AgentHandle,
        max_runtime: Option<Duration>,
    ) -> LifecycleResult<()> {
        let name = name.into();
        self.shared
            .registry_mut()
            .register_with_runtime(name.clone(), handle, max_runtime)?;
        debug!(agent = %name, "agent registered");
        Ok(())
    }

    /// Registered agents, sorted by name.
    pub fn agents(&self) -> Vec<AgentInfo> {
        self.shared.registry().list()
    }

    /// The current agent, if any.
    pub fn current(&self) -> Option<String> {
        self.shared
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The state of a registered agent.
    pub fn state_of(&self, name: &str) -> Option<AgentState> {
        self.shared.registry().state(name)
    }

    /// Whether a transition is in progress.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.is_busy()
    }

    /// A read view of the busy flag.
    pub fn busy_flag(&self) -> BusyFlag {
        self.shared.busy.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    /// Makes `name` the one active agent.
    ///
    /// An unknown name is reported and changes nothing. Switching to the
    /// current agent restarts it.
    pub async fn switch_to(&self, name: &str) -> LifecycleResult<()> {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;

        let Some((handle, max_runtime)) = shared.lookup(name) else {
            warn!(agent = %name, "unknown agent requested");
            shared
                .report(UNKNOWN_AGENT_PROMPT, &format!("Unknown agent requested: {}", name))
                .await;
            return Err(LifecycleError::UnknownAgent(name.to_string()));
        };

        let _busy = shared.busy.raise();
        info!(agent = %name, previous = ?control.current, "switching agent");
        shared.emit(LifecycleEvent::TransitionStarted {
            agent: name.to_string(),
        });

        if let Some(previous) = control.current.clone() {
            // Failures are already logged and must not block the switch.
            let _ = shared.stop_agent(&mut control, &previous).await;
            shared.set_current(&mut control, None);
            debug!(
                settle_ms = shared.settle_interval.as_millis() as u64,
                "waiting for devices to settle"
            );
            tokio::time::sleep(shared.settle_interval).await;
        }

        control.generation += 1;
        let generation = control.generation;
        shared.set_current(&mut control, Some(name));

        let spoken = Command::SwitchTo(name.to_string()).spoken_name();
        shared.speech.speak(&format!("Switched to {}", spoken)).await;
        shared.set_state(name, AgentState::Starting);

        let started = match &handle {
            AgentHandle::Detachable(agent) => agent.run_detached().await,
            AgentHandle::Blocking(agent) => {
                shared.set_state(name, AgentState::Running);
                let runtime = max_runtime.unwrap_or(shared.max_runtime);
                control.running = Some(Shared::spawn_run(
                    shared.clone(),
                    name,
                    agent.clone(),
                    runtime,
                    generation,
                ));
                Ok(())
            }
        };

        match started {
            Ok(()) => {
                shared.set_state(name, AgentState::Running);
                info!(agent = %name, mode = %handle.mode(), "agent started");
                shared.emit(LifecycleEvent::AgentStarted {
                    agent: name.to_string(),
                });
                shared.emit(LifecycleEvent::TransitionFinished {
                    agent: name.to_string(),
                    success: true,
                });
                Ok(())
            }
            Err(e) => {
                error!(agent = %name, error = %e, "agent failed to start");
                if let Err(te) = handle.terminate().await {
                    warn!(agent = %name, error = %te, "cleanup after failed start also failed");
                }
                shared.set_state(name, AgentState::Terminated);
                shared.set_current(&mut control, None);
                shared
                    .report(
                        &format!("Failed to switch agents: {}", e),
                        &format!("Failed to switch to {}: {}", name, e),
                    )
                    .await;
                shared.emit(LifecycleEvent::AgentFailed {
                    agent: name.to_string(),
                    error: e.to_string(),
                });
                shared.emit(LifecycleEvent::TransitionFinished {
                    agent: name.to_string(),
                    success: false,
                });
                Err(LifecycleError::Transition {
                    agent: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Terminates every registered agent.
    ///
    /// One agent failing to stop never prevents attempts on the rest.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;
        let _busy = shared.busy.raise();

        info!("shutting down all agents");
        control.generation += 1;

        let names = shared.registry().names();
        let mut report = ShutdownReport::default();
        for name in names {
            match shared.stop_agent(&mut control, &name).await {
                Ok(()) => report.terminated.push(name),
                Err(e) => report.failures.push((name, e.to_string())),
            }
        }
        shared.set_current(&mut control, None);

        info!(
            terminated = report.terminated.len(),
            failed = report.failures.len(),
            "all agents shut down"
        );
        report
    }
}

impl Shared {
    fn registry(&self) -> RwLockReadGuard<'_, AgentRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, AgentRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, name: &str) -> Option<(AgentHandle, Option<Duration>)> {
        self.registry()
            .get(name)
            .map(|slot| (slot.handle.clone(), slot.max_runtime))
    }

    fn set_state(&self, name: &str, state: AgentState) {
        if let Some(previous) = self.registry_mut().set_state(name, state) {
            if previous != state {
                debug!(agent = %name, from = %previous, to = %state, "agent state changed");
            }
        }
    }

    fn set_current(&self, control: &mut Control, agent: Option<&str>) {
        control.current = agent.map(str::to_string);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = control.current.clone();
    }

    fn emit(&self, event: LifecycleEvent) {
        // Ignore send errors (no receivers)
        let _ = self.events.send(event);
    }

    fn log_error(&self, message: &str) {
        if let Err(e) = self.log.log_error(message) {
            error!(error = %e, message = %message, "failed to write error log");
        }
    }

    /// Logs `logged` to the error stream and speaks `spoken`.
    async fn report(&self, spoken: &str, logged: &str) {
        self.log_error(logged);
        self.speech.speak(spoken).await;
    }

    /// Stops one agent. Must be called with the lifecycle lock held.
    ///
    /// A blocking agent's run task is cancelled and awaited before its
    /// `terminate` is called, so no run code executes afterwards.
    async fn stop_agent(&self, control: &mut Control, name: &str) -> Result<(), AgentError> {
        if control.running.as_ref().is_some_and(|task| task.agent == name) {
            if let Some(task) = control.running.take() {
                let _ = task.cancel.send(true);
                if let Err(e) = task.handle.await {
                    warn!(agent = %name, error = %e, "agent run task did not exit cleanly");
                }
            }
        }

        let Some((handle, _)) = self.lookup(name) else {
            return Ok(());
        };

        if self.registry().state(name).is_some_and(|s| s.is_active()) {
            self.set_state(name, AgentState::Stopping);
        }

        let result = handle.terminate().await;
        match &result {
            Ok(()) => debug!(agent = %name, "agent terminated"),
            Err(e) => {
                warn!(agent = %name, error = %e, "agent termination failed");
                self.log_error(&format!("Error terminating {}: {}", name, e));
                self.emit(LifecycleEvent::AgentFailed {
                    agent: name.to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.set_state(name, AgentState::Terminated);
        self.emit(LifecycleEvent::AgentStopped {
            agent: name.to_string(),
        });
        result
    }

    fn spawn_run(
        shared: Arc<Shared>,
        name: &str,
        agent: Arc<dyn BlockingAgent>,
        max_runtime: Duration,
        generation: u64,
    ) -> RunningTask {
        let (cancel, mut cancelled) = watch::channel(false);
        let agent_name = name.to_string();

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancelled.changed() => return,
                outcome = tokio::time::timeout(max_runtime, agent.run()) => outcome,
            };

            match outcome {
                Ok(Ok(())) => info!(agent = %agent_name, "agent finished"),
                Ok(Err(e)) => {
                    error!(agent = %agent_name, error = %e, "agent failed");
                    shared.emit(LifecycleEvent::AgentFailed {
                        agent: agent_name.clone(),
                        error: e.to_string(),
                    });
                    if let Err(e) = agent.terminate().await {
                        warn!(agent = %agent_name, error = %e, "agent termination failed");
                        shared.log_error(&format!("Error terminating {}: {}", agent_name, e));
                    }
                    let spoken = Command::SwitchTo(agent_name.clone()).spoken_name();
                    shared
                        .report(
                            &format!("{} stopped with an error", spoken),
                            &format!("Agent {} failed: {}", agent_name, e),
                        )
                        .await;
                }
                Err(_) => {
                    warn!(
                        agent = %agent_name,
                        max_runtime_secs = max_runtime.as_secs(),
                        "agent reached maximum runtime"
                    );
                    if let Err(e) = agent.terminate().await {
                        warn!(agent = %agent_name, error = %e, "agent termination failed");
                        shared.log_error(&format!("Error terminating {}: {}", agent_name, e));
                    }
                }
            }

            let mut control = tokio::select! {
                biased;
                _ = cancelled.changed() => return,
                control = shared.control.lock() => control,
            };
            if control.generation == generation {
                control.running = None;
                shared.set_current(&mut control, None);
                shared.set_state(&agent_name, AgentState::Terminated);
                shared.emit(LifecycleEvent::AgentFinished { agent: agent_name });
            }
        });

        RunningTask {
            agent: name.to_string(),
            cancel,
            handle,
        }
    }
}
