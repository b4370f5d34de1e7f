//! Agent lifecycle and coordination for VisionAID.
//!
//! This crate provides:
//! - Agent contracts ([`BlockingAgent`], [`DetachableAgent`]) and a
//!   process-backed implementation ([`ProcessAgent`])
//! - [`LifecycleManager`] enforcing at most one active agent, with ordered,
//!   serialized transitions and a [`BusyFlag`]
//! - [`VoiceDispatcher`] turning recognized speech into queued commands
//! - [`Coordinator`] wiring the event bus, event manager, lifecycle manager
//!   and voice loop together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use visionaid_persistence::EventLog;
//! use visionaid_runtime::{Coordinator, RuntimeConfig};
//! use visionaid_speech::{LineRecognizer, SpeechGate, TracingSynthesizer};
//!
//! # async fn example() -> visionaid_runtime::Result<()> {
//! let log = Arc::new(EventLog::open_in_memory()?);
//! let speech = Arc::new(SpeechGate::new(Arc::new(TracingSynthesizer)));
//! let mut coordinator = Coordinator::new(RuntimeConfig::from_env(), log, speech);
//!
//! coordinator.start(Some(Arc::new(LineRecognizer::stdin()))).await?;
//! while !coordinator.exit_requested() {
//!     coordinator.dispatch_tick().await;
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod busy;
pub mod config;
pub mod coordinator;
pub mod definition;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod process;
pub mod registry;
pub mod voice;

pub use agent::{AgentError, AgentHandle, AgentInfo, AgentMode, AgentState, BlockingAgent, DetachableAgent};
pub use busy::{BusyFlag, BusyGuard};
pub use config::RuntimeConfig;
pub use coordinator::{Coordinator, SHUTDOWN_PROMPT};
pub use definition::{load_definitions, write_example_definitions, AgentDefinition, AGENTS_FILE};
pub use error::{LifecycleError, LifecycleResult, Result, RuntimeError};
pub use event::LifecycleEvent;
pub use lifecycle::{LifecycleManager, ShutdownReport, UNKNOWN_AGENT_PROMPT};
pub use process::ProcessAgent;
pub use registry::{AgentRegistry, AgentSlot};
pub use voice::{ListenOutcome, VoiceDispatcher, VoiceMessage, VoiceSwitch, NOT_RECOGNIZED_PROMPT};
