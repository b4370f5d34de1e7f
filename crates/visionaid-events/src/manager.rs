//! EventManager - validates, stores, fans out and reacts to bus events.
//!
//! Shared state follows the usual pattern:
//! - `Arc<RwLock<HashMap>>` for the last-message table (read by the status
//!   board on every render, written once per event)
//! - `Arc<RwLock<Vec<Sender>>>` for in-process subscribers

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{mpsc as async_mpsc, watch};
use tracing::{debug, error, warn};

use visionaid_models::EventRecord;
use visionaid_persistence::EventLog;
use visionaid_speech::SpeechGate;

use crate::bus::BusMessage;
use crate::error::{EventError, Result};
use crate::reaction::ReactionTable;

/// Most recent event from one agent tag.
#[derive(Debug, Clone, PartialEq)]
pub struct LastMessage {
    /// The accepted record.
    pub record: EventRecord,
    /// When the coordinator received it (monotonic).
    pub received_at: Instant,
}

/// Consumer side of the event bus.
///
/// Every accepted payload goes through the same pipeline, in order:
/// validate, update the last-message table, append to the log, notify
/// subscribers, run the reaction rule, speak. A malformed payload stops at
/// validation and leaves exactly one error-log row. A failing reaction rule
/// leaves one error-log row next to the already stored event.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use visionaid_events::EventManager;
/// use visionaid_persistence::EventLog;
/// use visionaid_speech::{SpeechGate, TracingSynthesizer};
///
/// # async fn example() -> visionaid_events::Result<()> {
/// let log = Arc::new(EventLog::open_in_memory()?);
/// let speech = Arc::new(SpeechGate::new(Arc::new(TracingSynthesizer)));
/// let manager = EventManager::new(log, speech);
///
/// let rx = manager.subscribe();
/// manager
///     .handle_payload(r#"{"source":"vision","agent":"barcode","data":{"product":"Tea"}}"#)
///     .await?;
/// assert_eq!(rx.recv().unwrap().agent, "barcode");
/// # Ok(())
/// # }
/// ```
pub struct EventManager {
    log: Arc<EventLog>,
    speech: Arc<SpeechGate>,
    reactions: ReactionTable,
    /// Latest record per agent tag.
    last_messages: Arc<RwLock<HashMap<String, LastMessage>>>,
    /// List of subscriber channels.
    subscribers: Arc<RwLock<Vec<Sender<EventRecord>>>>,
}

impl EventManager {
    /// Creates a manager with the standard reaction rules.
    pub fn new(log: Arc<EventLog>, speech: Arc<SpeechGate>) -> Self {
        Self {
            log,
            speech,
            reactions: ReactionTable::standard(),
            last_messages: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replaces the reaction table.
    pub fn with_reactions(mut self, reactions: ReactionTable) -> Self {
        self.reactions = reactions;
        self
    }

    /// Subscribes to accepted events.
    ///
    /// The receiver gets a clone of every record that passed validation.
    /// Dropped receivers are pruned on the next broadcast.
    pub fn subscribe(&self) -> Receiver<EventRecord> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.write() {
            subs.push(tx);
        }
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Runs one raw bus payload through the pipeline.
    ///
    /// Returns the accepted record, or [`EventError::Malformed`] when the
    /// payload is not a valid event. Storage and reaction failures are
    /// recorded but do not reject the event.
    pub async fn handle_payload(&self, payload: &str) -> Result<EventRecord> {
        let record = match EventRecord::from_json(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "dropping malformed event");
                self.record_error(&format!("Error handling message: {}", e));
                return Err(EventError::Malformed(e));
            }
        };

        debug!(agent = %record.agent, source = %record.source, "event received");

        self.remember(&record);

        if let Err(e) = self.log.insert(&record) {
            error!(agent = %record.agent, error = %e, "failed to store event");
        }

        self.broadcast(&record);

        match self.reactions.react(&record) {
            Ok(Some(utterance)) => self.speech.speak(&utterance).await,
            Ok(None) => {}
            Err(e) => {
                warn!(agent = %record.agent, error = %e, "reaction failed");
                self.record_error(&format!("Error reacting to {} event: {}", record.agent, e));
            }
        }

        Ok(record)
    }

    /// Consumes bus messages until the channel closes or `shutdown` is set.
    pub async fn run(
        &self,
        mut messages: async_mpsc::Receiver<BusMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(BusMessage::Payload(payload)) => {
                        // Malformed payloads are already logged by the pipeline.
                        let _ = self.handle_payload(&payload).await;
                    }
                    Some(BusMessage::Invalid(reason)) => {
                        warn!(reason = %reason, "undecodable bus message");
                        self.record_error(&format!("Error handling message: {}", reason));
                    }
                    Some(BusMessage::TransportError(e)) => {
                        self.record_error(&format!("Bus transport error: {}", e));
                        if !*shutdown.borrow() {
                            self.speech.speak(&format!("Communication error: {}", e)).await;
                        }
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("event consumer stopped");
    }

    /// Snapshot of the last-message table.
    pub fn last_messages(&self) -> HashMap<String, LastMessage> {
        self.last_messages
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// The latest record from `agent`, if any.
    pub fn last_message(&self, agent: &str) -> Option<LastMessage> {
        self.last_messages
            .read()
            .ok()
            .and_then(|m| m.get(agent).cloned())
    }

    fn remember(&self, record: &EventRecord) {
        if let Ok(mut table) = self.last_messages.write() {
            table.insert(
                record.agent.clone(),
                LastMessage {
                    record: record.clone(),
                    received_at: Instant::now(),
                },
            );
        }
    }

    /// Broadcasts to all subscribers, removing disconnected ones.
    fn broadcast(&self, record: &EventRecord) {
        if let Ok(mut subs) = self.subscribers.write() {
            subs.retain(|tx| tx.send(record.clone()).is_ok());
        }
    }

    fn record_error(&self, message: &str) {
        if let Err(e) = self.log.log_error(message) {
            error!(error = %e, message = %message, "failed to write error log");
        }
    }
}
