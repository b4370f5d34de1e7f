//! Core data models for VisionAID.
//!
//! This crate provides the types shared by every part of the coordinator:
//! the `EventRecord` carried on the event bus and the `Command` values
//! produced by the voice dispatch loop.

pub mod command;
pub mod record;

pub use command::{Command, Vocabulary, EXIT_TOKEN};
pub use record::{now_timestamp, EventRecord, MalformedEventError, DEFAULT_SOURCE};
