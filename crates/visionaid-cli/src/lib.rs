//! VisionAID CLI library.
//!
//! Argument parsing and command handlers for the `visionaid` binary.

pub mod cli;
pub mod commands;

/// File name of the event log inside the state directory.
pub const LOG_FILE: &str = "vision_logs.db";
