//! Event records carried on the bus.
//!
//! An `EventRecord` is the unit a perceptual agent publishes when it
//! produces a result. The wire form is a JSON object:
//!
//! ```text
//! {"source": "vision", "agent": "object", "data": {...}, "timestamp": 1712345678.25}
//! ```
//!
//! `agent` and `data` are required; `source` and `timestamp` fall back to
//! [`DEFAULT_SOURCE`] and the receipt time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Source tag used when a publisher omits `source`.
pub const DEFAULT_SOURCE: &str = "unknown";

/// The payload did not match the event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    /// The payload is not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// The payload is valid JSON but not an object.
    #[error("event envelope is not a JSON object")]
    NotAnObject,

    /// A required key is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A key is present with the wrong JSON type.
    #[error("field '{field}' must be {expected}")]
    WrongType {
        /// Offending key.
        field: &'static str,
        /// Human-readable expected type.
        expected: &'static str,
    },
}

/// One structured message describing an agent's detection or result.
///
/// Records are immutable once published; consumers clone them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Producing subsystem (e.g. "vision").
    pub source: String,
    /// Logical name of the emitting agent (e.g. "barcode", "object").
    pub agent: String,
    /// Agent-specific payload.
    pub data: Map<String, Value>,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Current wall-clock time as floating-point seconds.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl EventRecord {
    /// Creates a record stamped with the current time.
    pub fn new(source: impl Into<String>, agent: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            source: source.into(),
            agent: agent.into(),
            data,
            timestamp: now_timestamp(),
        }
    }

    /// Parses and validates a wire payload.
    pub fn from_json(payload: &str) -> Result<Self, MalformedEventError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| MalformedEventError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validates an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, MalformedEventError> {
        let Value::Object(mut envelope) = value else {
            return Err(MalformedEventError::NotAnObject);
        };

        let agent = match envelope.remove("agent") {
            Some(Value::String(agent)) if !agent.trim().is_empty() => agent,
            Some(_) => {
                return Err(MalformedEventError::WrongType {
                    field: "agent",
                    expected: "a non-empty string",
                })
            }
            None => return Err(MalformedEventError::MissingField("agent")),
        };

        let data = match envelope.remove("data") {
            Some(Value::Object(data)) => data,
            Some(_) => {
                return Err(MalformedEventError::WrongType {
                    field: "data",
                    expected: "an object",
                })
            }
            None => return Err(MalformedEventError::MissingField("data")),
        };

        let source = match envelope.remove("source") {
            Some(Value::String(source)) => source,
            None | Some(Value::Null) => DEFAULT_SOURCE.to_string(),
            Some(_) => {
                return Err(MalformedEventError::WrongType {
                    field: "source",
                    expected: "a string",
                })
            }
        };

        let timestamp = match envelope.remove("timestamp") {
            Some(Value::Number(n)) => n.as_f64().ok_or(MalformedEventError::WrongType {
                field: "timestamp",
                expected: "a number",
            })?,
            None | Some(Value::Null) => now_timestamp(),
            Some(_) => {
                return Err(MalformedEventError::WrongType {
                    field: "timestamp",
                    expected: "a number",
                })
            }
        };

        Ok(Self {
            source,
            agent,
            data,
            timestamp,
        })
    }

    /// Serializes the record to its single-line wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serializes only the `data` mapping, as stored in the event log.
    pub fn data_json(&self) -> String {
        Value::Object(self.data.clone()).to_string()
    }
}
