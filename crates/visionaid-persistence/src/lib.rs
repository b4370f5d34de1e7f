//! Persistence layer for VisionAID.
//!
//! - [`EventLog`]: append-only SQLite store of every event the bus carries,
//!   plus a separate error stream. No update or delete operations exist.
//! - [`atomic`]: crash-safe JSON files (agent definitions).
//!
//! # Example
//!
//! ```no_run
//! use visionaid_persistence::{EventLog, LogQuery};
//! use visionaid_models::EventRecord;
//!
//! let log = EventLog::open("/tmp/visionaid/vision_logs.db").unwrap();
//! let record = EventRecord::new("vision", "barcode", Default::default());
//! log.insert(&record).unwrap();
//!
//! let recent = log.query(&LogQuery::new().with_agent("barcode").with_limit(10)).unwrap();
//! ```

pub mod atomic;
pub mod error;
pub mod event_log;
pub mod query;

pub use error::{PersistenceError, Result};
pub use event_log::{ErrorEntry, EventLog, LoggedEvent};
pub use query::LogQuery;
