//! Coordinator - wires the bus, event manager, lifecycle and voice loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use visionaid_events::{BusSubscriber, EventManager, StatusBoard, StatusLevel};
use visionaid_models::{Command, Vocabulary};
use visionaid_persistence::EventLog;
use visionaid_speech::{Recognizer, SpeechGate};

use crate::agent::AgentHandle;
use crate::config::RuntimeConfig;
use crate::definition::AgentDefinition;
use crate::error::{Result, RuntimeError};
use crate::lifecycle::{LifecycleManager, ShutdownReport};
use crate::voice::{VoiceDispatcher, VoiceMessage, VoiceSwitch};

/// Spoken once when the user asks to shut everything down.
pub const SHUTDOWN_PROMPT: &str = "Shutting down all systems";

/// Capacity of the channel between the bus subscriber and the event manager.
const BUS_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each background task.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// The always-on coordinator.
///
/// Owns the event log, speech gate, event manager, lifecycle manager and
/// status board. [`start`](Coordinator::start) binds the bus and spawns the
/// subscriber, the event consumer and (optionally) the voice loop. The
/// driving loop then calls [`dispatch_tick`](Coordinator::dispatch_tick)
/// regularly; that is the only place queued voice commands are acted on.
pub struct Coordinator {
    config: RuntimeConfig,
    log: Arc<EventLog>,
    speech: Arc<SpeechGate>,
    events: Arc<EventManager>,
    lifecycle: LifecycleManager,
    board: Arc<StatusBoard>,
    vocabulary: Vocabulary,
    voice: VoiceSwitch,
    queue_tx: mpsc::Sender<VoiceMessage>,
    queue_rx: mpsc::Receiver<VoiceMessage>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    bus_addr: Option<SocketAddr>,
    started: bool,
    shut_down: bool,
    exit_requested: bool,
}

impl Coordinator {
    /// Creates a coordinator with no agents. Voice control starts armed.
    pub fn new(config: RuntimeConfig, log: Arc<EventLog>, speech: Arc<SpeechGate>) -> Self {
        let vocabulary = Vocabulary::standard();
        let events = Arc::new(EventManager::new(log.clone(), speech.clone()));
        let lifecycle = LifecycleManager::new(&config, speech.clone(), log.clone());
        let board = Arc::new(Self::board_for(&config, &vocabulary));
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            log,
            speech,
            events,
            lifecycle,
            board,
            vocabulary,
            voice: VoiceSwitch::new(true),
            queue_tx,
            queue_rx,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
            bus_addr: None,
            started: false,
            shut_down: false,
            exit_requested: false,
        }
    }

    fn board_for(config: &RuntimeConfig, vocabulary: &Vocabulary) -> StatusBoard {
        let mut help: Vec<String> = vocabulary
            .friendly_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        help.push("Exit".to_string());
        StatusBoard::new(config.help_cooldown).with_help(help)
    }

    /// Replaces the voice vocabulary (and the help list built from it).
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.board = Arc::new(Self::board_for(&self.config, &vocabulary));
        self.vocabulary = vocabulary;
        self
    }

    /// Sets whether voice control starts armed.
    pub fn with_voice_armed(self, armed: bool) -> Self {
        self.voice.set_armed(armed);
        self
    }

    /// Registers an agent.
    pub fn register(&self, name: impl Into<String>, handle: AgentHandle) -> Result<()> {
        Ok(self.lifecycle.register(name, handle)?)
    }

    /// Registers process-backed agents from definitions.
    pub fn register_definitions(&self, definitions: &[AgentDefinition]) -> Result<()> {
        for def in definitions {
            self.lifecycle.register_with_runtime(
                def.name.clone(),
                def.to_handle(&self.config.bus_addr),
                def.max_runtime(),
            )?;
        }
        Ok(())
    }

    /// Binds the bus and spawns the background tasks.
    ///
    /// Without a recognizer no voice loop runs; commands can still be
    /// queued through [`command_sender`](Coordinator::command_sender).
    pub async fn start(&mut self, recognizer: Option<Arc<dyn Recognizer>>) -> Result<SocketAddr> {
        if self.shut_down {
            return Err(RuntimeError::ShutDown);
        }
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }

        let subscriber = BusSubscriber::bind(self.config.bus_addr.as_str()).await?;
        let addr = subscriber.local_addr()?;

        let (bus_tx, bus_rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);
        self.tasks
            .push(tokio::spawn(subscriber.run(bus_tx, self.shutdown_rx.clone())));

        let events = Arc::clone(&self.events);
        let shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            events.run(bus_rx, shutdown).await;
        }));

        if let Some(recognizer) = recognizer {
            let dispatcher = VoiceDispatcher::new(
                &self.config,
                recognizer,
                self.speech.clone(),
                self.lifecycle.busy_flag(),
                self.voice.clone(),
                self.queue_tx.clone(),
            )
            .with_vocabulary(self.vocabulary.clone());
            self.tasks
                .push(tokio::spawn(dispatcher.run(self.shutdown_rx.clone())));
        }

        self.bus_addr = Some(addr);
        self.started = true;
        info!(addr = %addr, agents = self.lifecycle.agents().len(), "coordinator started");
        Ok(addr)
    }

    /// Drains the voice queue and acts on each message, in receipt order.
    ///
    /// Returns the number of messages handled.
    pub async fn dispatch_tick(&mut self) -> usize {
        let mut handled = 0;

        while !self.shut_down {
            let Ok(message) = self.queue_rx.try_recv() else {
                break;
            };
            handled += 1;

            match message {
                VoiceMessage::Command(Command::Exit) => {
                    info!("exit requested");
                    self.exit_requested = true;
                    if let Err(e) = self.shutdown_all().await {
                        error!(error = %e, "shutdown failed");
                    }
                }
                VoiceMessage::Command(Command::SwitchTo(agent)) => {
                    if self.lifecycle.is_busy() {
                        warn!(agent = %agent, "dropping command during agent transition");
                        continue;
                    }
                    // Failures are reported by the lifecycle manager.
                    let _ = self.switch_to(&agent).await;
                }
                VoiceMessage::Error(e) => {
                    self.board
                        .set_status(StatusLevel::Error, format!("Voice Error: {}", e.prompt()));
                }
            }
        }

        self.sync_board();
        handled
    }

    /// Switches the active agent.
    pub async fn switch_to(&self, name: &str) -> Result<()> {
        if self.shut_down {
            return Err(RuntimeError::ShutDown);
        }

        let result = self.lifecycle.switch_to(name).await;
        self.board.set_active(self.lifecycle.current().as_deref());
        if result.is_ok() {
            self.board.clear_status();
        }
        Ok(result?)
    }

    /// Arms or disarms the voice loop. Returns the new state.
    pub fn toggle_voice(&self) -> bool {
        let armed = self.voice.toggle();
        info!(armed, "voice control toggled");
        let text = if armed {
            "Voice control enabled"
        } else {
            "Voice control disabled"
        };
        self.board.set_status(StatusLevel::Info, text);
        armed
    }

    /// Terminates every agent, stops background tasks and closes the log.
    ///
    /// Later calls do nothing.
    pub async fn shutdown_all(&mut self) -> Result<ShutdownReport> {
        if self.shut_down {
            return Ok(ShutdownReport::default());
        }
        self.shut_down = true;

        info!("shutting down coordinator");
        self.speech.speak(SHUTDOWN_PROMPT).await;

        let report = self.lifecycle.shutdown_all().await;
        self.board.clear();

        let _ = self.shutdown_tx.send(true);
        for mut handle in self.tasks.drain(..) {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, &mut handle).await.is_err() {
                debug!("background task did not stop in time; aborting");
                handle.abort();
            }
        }

        self.log.close()?;
        info!(failures = report.failures.len(), "coordinator stopped");
        Ok(report)
    }

    /// Whether an exit command has been processed.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// The bound bus address, once started.
    pub fn bus_addr(&self) -> Option<SocketAddr> {
        self.bus_addr
    }

    /// A sender into the voice command queue.
    pub fn command_sender(&self) -> mpsc::Sender<VoiceMessage> {
        self.queue_tx.clone()
    }

    /// Renders the status board against the latest events.
    pub fn render_status(&self) -> Vec<String> {
        self.board
            .render(&self.events.last_messages(), Instant::now())
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn voice_switch(&self) -> &VoiceSwitch {
        &self.voice
    }

    /// Keeps the board's active agent in line with the lifecycle manager
    /// (blocking agents can finish on their own).
    fn sync_board(&self) {
        if self.shut_down {
            return;
        }
        let current = self.lifecycle.current();
        if self.board.active() != current {
            self.board.set_active(current.as_deref());
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Send shutdown signal if still running
        if self.started && !self.shut_down {
            let _ = self.shutdown_tx.send(true);
        }
    }
}
