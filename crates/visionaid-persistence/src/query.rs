//! Query criteria for the event log.

use rusqlite::types::Value;

/// Filter criteria for reading persisted events.
///
/// Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    /// Only events from this agent tag.
    pub agent: Option<String>,
    /// Only events with `timestamp >= since`.
    pub since: Option<f64>,
    /// Only events with `timestamp <= until`.
    pub until: Option<f64>,
    /// At most this many rows.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Creates a query matching every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the agent filter.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Sets the lower time bound (inclusive).
    pub fn since(mut self, timestamp: f64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Sets the upper time bound (inclusive).
    pub fn until(mut self, timestamp: f64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builds the SELECT statement and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql =
            String::from("SELECT id, source, agent, data, timestamp FROM vision_logs WHERE 1 = 1");
        let mut params = Vec::new();

        if let Some(ref agent) = self.agent {
            params.push(Value::Text(agent.clone()));
            sql.push_str(&format!(" AND agent = ?{}", params.len()));
        }
        if let Some(since) = self.since {
            params.push(Value::Real(since));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(until) = self.until {
            params.push(Value::Real(until));
            sql.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }

        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        if let Some(limit) = self.limit {
            params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        (sql, params)
    }
}
