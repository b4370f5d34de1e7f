//! EventLog: SQLite-backed append-only store of bus events and errors.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use tracing::{debug, info};

use visionaid_models::{now_timestamp, EventRecord};

use crate::error::{PersistenceError, Result};
use crate::query::LogQuery;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS vision_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        agent TEXT NOT NULL,
        data TEXT NOT NULL,
        timestamp REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_vision_logs_agent ON vision_logs(agent);
    CREATE INDEX IF NOT EXISTS idx_vision_logs_timestamp ON vision_logs(timestamp);

    CREATE TABLE IF NOT EXISTS error_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message TEXT NOT NULL,
        timestamp REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_error_logs_timestamp ON error_logs(timestamp);";

/// A persisted event row.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Row id (insertion order).
    pub id: i64,
    /// Producing subsystem.
    pub source: String,
    /// Emitting agent tag.
    pub agent: String,
    /// Agent payload; rows whose stored text is not JSON come back as a string.
    pub data: Value,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
}

/// A persisted error row.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    /// Row id (insertion order).
    pub id: i64,
    /// Error description.
    pub message: String,
    /// Time the error was logged.
    pub timestamp: f64,
}

/// Append-only event and error log.
///
/// The connection sits behind a `Mutex` so the log can be shared as
/// `Arc<EventLog>` between the bus consumer, the lifecycle manager and the
/// voice loop. After [`close`](EventLog::close) every call fails with
/// [`PersistenceError::Closed`].
pub struct EventLog {
    conn: Mutex<Option<Connection>>,
}

impl EventLog {
    /// Opens (or creates) the log database at `path`.
    ///
    /// Creates parent directories, enables WAL mode and a busy timeout, and
    /// creates the tables if they do not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    PersistenceError::DirectoryError {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "event log opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Opens a log that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?;
        let conn = guard.as_ref().ok_or(PersistenceError::Closed)?;
        f(conn)
    }

    /// Appends one event row and returns its id.
    pub fn insert(&self, record: &EventRecord) -> Result<i64> {
        let data = record.data_json();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vision_logs (source, agent, data, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![record.source, record.agent, data, record.timestamp],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, agent = %record.agent, "event logged");
            Ok(id)
        })
    }

    /// Appends one row to the error stream, stamped with the current time.
    pub fn log_error(&self, message: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO error_logs (message, timestamp) VALUES (?1, ?2)",
                params![message, now_timestamp()],
            )?;
            Ok(())
        })
    }

    /// Reads events matching `query`, newest first.
    pub fn query(&self, query: &LogQuery) -> Result<Vec<LoggedEvent>> {
        let (sql, values) = query.to_sql();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .map(|(id, source, agent, data, timestamp)| LoggedEvent {
                    id,
                    source,
                    agent,
                    data: serde_json::from_str(&data).unwrap_or(Value::String(data)),
                    timestamp,
                })
                .collect())
        })
    }

    /// Reads error rows, newest first.
    pub fn errors(&self, limit: Option<usize>) -> Result<Vec<ErrorEntry>> {
        let limit = limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message, timestamp FROM error_logs ORDER BY id DESC LIMIT ?1",
            )?;
            let entries = stmt
                .query_map(params![limit], |row| {
                    Ok(ErrorEntry {
                        id: row.get(0)?,
                        message: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    /// Number of event rows.
    pub fn count(&self) -> Result<usize> {
        self.count_rows("SELECT COUNT(*) FROM vision_logs")
    }

    /// Number of error rows.
    pub fn error_count(&self) -> Result<usize> {
        self.count_rows("SELECT COUNT(*) FROM error_logs")
    }

    fn count_rows(&self, sql: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    /// Releases the database handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?
            .take();

        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| PersistenceError::Database(e))?;
            info!("event log closed");
        }
        Ok(())
    }

    /// Returns true once [`close`](EventLog::close) has run.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|c| c.is_none()).unwrap_or(true)
    }
}
