//! Status board: the text overlay describing what the coordinator is doing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::manager::LastMessage;

/// Default time the command help stays visible after a switch.
pub const DEFAULT_HELP_COOLDOWN: Duration = Duration::from_secs(5);

/// Characters of a barcode shown in its summary.
const CODE_PREVIEW_CHARS: usize = 10;

/// Severity of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

#[derive(Debug, Default)]
struct BoardState {
    active: Option<String>,
    last_switch: Option<Instant>,
    status: Option<(StatusLevel, String)>,
    cleared: bool,
}

/// Renders the active agent, the latest event per agent and the voice
/// command help as plain text lines.
///
/// The help list is shown while no agent is active, and for the help
/// cooldown after each switch.
#[derive(Debug)]
pub struct StatusBoard {
    help: Vec<String>,
    help_cooldown: Duration,
    state: RwLock<BoardState>,
    revision: AtomicU64,
}

impl StatusBoard {
    /// Creates an empty board.
    pub fn new(help_cooldown: Duration) -> Self {
        Self {
            help: Vec::new(),
            help_cooldown,
            state: RwLock::new(BoardState::default()),
            revision: AtomicU64::new(0),
        }
    }

    /// Sets the command names listed in the help section.
    pub fn with_help(mut self, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.help = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Records the active agent (`None` once it has finished).
    pub fn set_active(&self, agent: Option<&str>) {
        self.update(|state| {
            if agent.is_some() {
                state.last_switch = Some(Instant::now());
            }
            state.active = agent.map(str::to_string);
        });
    }

    /// Sets the one-line status message.
    pub fn set_status(&self, level: StatusLevel, text: impl Into<String>) {
        let text = text.into();
        self.update(|state| state.status = Some((level, text)));
    }

    /// Removes the status message.
    pub fn clear_status(&self) {
        self.update(|state| state.status = None);
    }

    /// The currently shown agent.
    pub fn active(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.active.clone())
    }

    /// The current status message.
    pub fn status(&self) -> Option<(StatusLevel, String)> {
        self.state.read().ok().and_then(|s| s.status.clone())
    }

    /// Releases the board. Renders nothing until it is updated again.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = BoardState {
                cleared: true,
                ..BoardState::default()
            };
        }
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_cleared(&self) -> bool {
        self.state.read().map(|s| s.cleared).unwrap_or(true)
    }

    /// Bumped on every change to the board's own state.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    /// Renders the board against the given last-message table.
    pub fn render(&self, last: &HashMap<String, LastMessage>, now: Instant) -> Vec<String> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        if state.cleared {
            return Vec::new();
        }

        let mut lines = Vec::new();

        match &state.status {
            Some((StatusLevel::Error, text)) => lines.push(format!("Error: {}", text)),
            Some((StatusLevel::Info, text)) => lines.push(format!("Status: {}", text)),
            None => {}
        }

        if let Some(active) = &state.active {
            lines.push(format!("Active: {}", active));
        }

        if !last.is_empty() {
            lines.push("Last Events:".to_string());
            let mut agents: Vec<_> = last.iter().collect();
            agents.sort_by(|a, b| a.0.cmp(b.0));
            for (agent, message) in agents {
                let elapsed = now.saturating_duration_since(message.received_at);
                lines.push(format!(
                    "  {}: {} ({:.1}s ago)",
                    agent,
                    summarize(agent, &message.record.data),
                    elapsed.as_secs_f64()
                ));
            }
        }

        let show_help = state.active.is_none()
            || state
                .last_switch
                .map(|t| now.saturating_duration_since(t) < self.help_cooldown)
                .unwrap_or(true);
        if show_help && !self.help.is_empty() {
            lines.push("Voice Commands:".to_string());
            lines.extend(self.help.iter().map(|c| format!("  '{}'", c)));
        }

        lines
    }

    fn update(&self, f: impl FnOnce(&mut BoardState)) {
        if let Ok(mut state) = self.state.write() {
            state.cleared = false;
            f(&mut state);
        }
        self.revision.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(DEFAULT_HELP_COOLDOWN)
    }
}

/// One-line summary of an agent's latest event.
pub fn summarize(agent: &str, data: &Map<String, Value>) -> String {
    match agent {
        "barcode" => match data.get("code").and_then(Value::as_str) {
            Some(code) if !code.is_empty() => code.chars().take(CODE_PREVIEW_CHARS).collect(),
            _ => "no code".to_string(),
        },
        "document" => {
            let chars = data
                .get("text")
                .and_then(Value::as_str)
                .map(|t| t.chars().count())
                .unwrap_or(0);
            format!("{} chars", chars)
        }
        "object" => {
            let count = data
                .get("objects")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            format!("{} objects", count)
        }
        _ => "activity detected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visionaid_models::EventRecord;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test data must be an object"),
        }
    }

    fn last(agent: &str, value: Value, received_at: Instant) -> (String, LastMessage) {
        (
            agent.to_string(),
            LastMessage {
                record: EventRecord::new("test", agent, data(value)),
                received_at,
            },
        )
    }

    #[test]
    fn test_summaries() {
        assert_eq!(
            summarize("barcode", &data(json!({"code": "0123456789012"}))),
            "0123456789"
        );
        assert_eq!(summarize("barcode", &data(json!({}))), "no code");
        assert_eq!(summarize("document", &data(json!({"text": "hello"}))), "5 chars");
        assert_eq!(
            summarize("object", &data(json!({"objects": ["a", "b"]}))),
            "2 objects"
        );
        assert_eq!(summarize("navigation", &data(json!({}))), "activity detected");
    }

    #[test]
    fn test_render_idle_shows_help() {
        let board = StatusBoard::default().with_help(["Object Detection", "Exit"]);
        let lines = board.render(&HashMap::new(), Instant::now());

        assert_eq!(
            lines,
            vec!["Voice Commands:", "  'Object Detection'", "  'Exit'"]
        );
    }

    #[test]
    fn test_render_active_with_events() {
        let board = StatusBoard::new(Duration::from_secs(5)).with_help(["Exit"]);
        board.set_active(Some("barcode_scanner"));

        let start = Instant::now();
        let table: HashMap<_, _> = [
            last("document", json!({"text": "abc"}), start),
            last("barcode", json!({"code": "0123456789012"}), start),
        ]
        .into_iter()
        .collect();

        let lines = board.render(&table, start + Duration::from_millis(2500));
        assert_eq!(lines[0], "Active: barcode_scanner");
        assert_eq!(lines[1], "Last Events:");
        assert_eq!(lines[2], "  barcode: 0123456789 (2.5s ago)");
        assert_eq!(lines[3], "  document: 3 chars (2.5s ago)");
        assert_eq!(lines[4], "Voice Commands:");

        // Help disappears once the cooldown has passed.
        let lines = board.render(&table, Instant::now() + Duration::from_secs(6));
        assert!(!lines.contains(&"Voice Commands:".to_string()));
    }

    #[test]
    fn test_error_status_and_clear() {
        let board = StatusBoard::default();
        let before = board.revision();
        board.set_status(StatusLevel::Error, "Voice Error: Speech service unavailable.");

        assert!(board.revision() > before);
        assert_eq!(
            board.render(&HashMap::new(), Instant::now())[0],
            "Error: Voice Error: Speech service unavailable."
        );

        board.clear();
        assert!(board.is_cleared());
        assert!(board.status().is_none());
        assert!(board.render(&HashMap::new(), Instant::now()).is_empty());

        board.set_active(Some("navigation"));
        assert!(!board.is_cleared());
        assert_eq!(board.active().as_deref(), Some("navigation"));
    }
}
