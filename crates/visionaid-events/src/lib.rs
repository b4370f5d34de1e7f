//! Event bus and event reaction for VisionAID.
//!
//! Perceptual agents publish [`EventRecord`](visionaid_models::EventRecord)s
//! as JSON lines over TCP. The coordinator binds one [`BusSubscriber`] that
//! forwards every line to the [`EventManager`], which:
//!
//! 1. validates the envelope (malformed payloads go to the error log),
//! 2. supersedes the agent's entry in the last-message table,
//! 3. appends the event to the event log,
//! 4. notifies in-process subscribers,
//! 5. speaks the agent-specific reaction from the [`ReactionTable`].
//!
//! Delivery is best-effort and at-most-once: there is no acknowledgement and
//! no replay for publishers that send before the subscriber is listening.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, watch};
//! use visionaid_events::{BusSubscriber, EventManager};
//! use visionaid_persistence::EventLog;
//! use visionaid_speech::{SpeechGate, TracingSynthesizer};
//!
//! # async fn example() -> visionaid_events::Result<()> {
//! let log = Arc::new(EventLog::open_in_memory()?);
//! let speech = Arc::new(SpeechGate::new(Arc::new(TracingSynthesizer)));
//! let manager = Arc::new(EventManager::new(log, speech));
//!
//! let (tx, rx) = mpsc::channel(64);
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! let subscriber = BusSubscriber::bind("127.0.0.1:5555").await?;
//! tokio::spawn(subscriber.run(tx, shutdown_rx.clone()));
//! manager.run(rx, shutdown_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod manager;
pub mod reaction;
pub mod status;

pub use bus::{BusMessage, BusPublisher, BusSubscriber, DEFAULT_BUS_ADDR, MAX_LINE_BYTES};
pub use error::{EventError, Result};
pub use manager::{EventManager, LastMessage};
pub use reaction::{ReactionError, ReactionRule, ReactionTable};
pub use status::{summarize, StatusBoard, StatusLevel};
