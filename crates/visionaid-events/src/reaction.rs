//! Agent-specific reactions: which utterance an incoming event produces.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use visionaid_models::EventRecord;

/// Longest document excerpt that is read aloud, in characters.
pub const MAX_DOCUMENT_CHARS: usize = 100;

/// Most object names announced for one detection.
pub const MAX_OBJECT_NAMES: usize = 3;

/// A rule failed on an event whose data has the wrong shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReactionError {
    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Maps event data to an optional utterance.
pub type ReactionRule = fn(&Map<String, Value>) -> Result<Option<String>, ReactionError>;

/// Dispatch table from agent tag to reaction rule.
///
/// Tags without a rule are stored and summarized but produce no speech.
#[derive(Clone)]
pub struct ReactionTable {
    rules: HashMap<String, ReactionRule>,
}

impl ReactionTable {
    /// A table with no rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// The built-in rules for the vision agents.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register("barcode", barcode_reaction);
        table.register("document", document_reaction);
        table.register("object", object_reaction);
        table.register("emotion", emotion_reaction);
        table
    }

    /// Registers a rule, returning the one it replaced.
    pub fn register(&mut self, tag: impl Into<String>, rule: ReactionRule) -> Option<ReactionRule> {
        self.rules.insert(tag.into(), rule)
    }

    /// Whether `tag` has a rule.
    pub fn has_rule(&self, tag: &str) -> bool {
        self.rules.contains_key(tag)
    }

    /// Applies the rule for the record's agent tag.
    pub fn react(&self, record: &EventRecord) -> Result<Option<String>, ReactionError> {
        match self.rules.get(&record.agent) {
            Some(rule) => rule(&record.data),
            None => Ok(None),
        }
    }
}

impl Default for ReactionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for ReactionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.rules.keys().collect();
        tags.sort();
        f.debug_struct("ReactionTable").field("tags", &tags).finish()
    }
}

fn optional_str<'a>(
    data: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, ReactionError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ReactionError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

fn barcode_reaction(data: &Map<String, Value>) -> Result<Option<String>, ReactionError> {
    let product = optional_str(data, "product")?.unwrap_or("unknown product");
    Ok(Some(format!("Barcode scanned: {}", product)))
}

fn document_reaction(data: &Map<String, Value>) -> Result<Option<String>, ReactionError> {
    let text = optional_str(data, "text")?.unwrap_or("");
    let excerpt: String = text.chars().take(MAX_DOCUMENT_CHARS).collect();
    Ok(Some(format!("Document text recognized: {}", excerpt)))
}

fn object_reaction(data: &Map<String, Value>) -> Result<Option<String>, ReactionError> {
    const WRONG: ReactionError = ReactionError::WrongType {
        field: "objects",
        expected: "an array of strings",
    };

    let objects = match data.get("objects") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(objects)) => objects,
        Some(_) => return Err(WRONG),
    };

    let names = objects
        .iter()
        .take(MAX_OBJECT_NAMES)
        .map(|o| o.as_str().ok_or(WRONG))
        .collect::<Result<Vec<_>, _>>()?;

    if names.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("Detected objects: {}", names.join(", "))))
}

fn emotion_reaction(data: &Map<String, Value>) -> Result<Option<String>, ReactionError> {
    let emotion = optional_str(data, "top_emotion")?.unwrap_or("unknown");
    let confidence = match data.get("confidence") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(_) => {
            return Err(ReactionError::WrongType {
                field: "confidence",
                expected: "a number",
            })
        }
    };

    Ok(Some(format!(
        "Detected emotion: {} ({:.1}% confidence)",
        emotion,
        confidence * 100.0
    )))
}
