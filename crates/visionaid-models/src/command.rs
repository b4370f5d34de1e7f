//! Voice commands and the phrase vocabulary that produces them.

use std::fmt;

/// Token of the command that shuts the whole system down.
pub const EXIT_TOKEN: &str = "exit";

/// A normalized command produced by one voice dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Make the named agent the active one.
    SwitchTo(String),
    /// Shut everything down.
    Exit,
}

impl Command {
    /// Builds a command from a vocabulary token.
    pub fn from_token(token: &str) -> Self {
        if token == EXIT_TOKEN {
            Command::Exit
        } else {
            Command::SwitchTo(token.to_string())
        }
    }

    /// Returns the vocabulary token for this command.
    pub fn as_token(&self) -> &str {
        match self {
            Command::SwitchTo(agent) => agent,
            Command::Exit => EXIT_TOKEN,
        }
    }

    /// Returns the token in a form suitable for speech ("barcode scanner").
    pub fn spoken_name(&self) -> String {
        self.as_token().replace('_', " ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Ordered phrase → token table.
///
/// Matching is substring based on lowercased text; the first phrase (in
/// insertion order) found in the text wins.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    phrases: Vec<(String, String)>,
    friendly_names: Vec<(String, String)>,
}

impl Vocabulary {
    /// Creates an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock VisionAID vocabulary.
    pub fn standard() -> Self {
        Self::new()
            .with_phrase("object detection", "object_detection")
            .with_phrase("detect objects", "object_detection")
            .with_phrase("barcode", "barcode_scanner")
            .with_phrase("scan code", "barcode_scanner")
            .with_phrase("document", "document_reader")
            .with_phrase("read text", "document_reader")
            .with_phrase("navigate", "navigation")
            .with_phrase("navigation", "navigation")
            .with_phrase("find product", "ecommerce_agent")
            .with_phrase("search online", "ecommerce_agent")
            .with_phrase("ecommerce", "ecommerce_agent")
            .with_phrase("emotion detection", "emotion_detection_agent")
            .with_phrase("detect emotion", "emotion_detection_agent")
            .with_phrase(EXIT_TOKEN, EXIT_TOKEN)
            .with_friendly_name("object_detection", "Object Detection")
            .with_friendly_name("barcode_scanner", "Barcode Scanner")
            .with_friendly_name("document_reader", "Document Reader")
            .with_friendly_name("navigation", "Navigation")
            .with_friendly_name("ecommerce_agent", "Search Online")
            .with_friendly_name("emotion_detection_agent", "Emotion Detection")
    }

    /// Appends a synonym phrase for a token.
    pub fn with_phrase(mut self, phrase: impl Into<String>, token: impl Into<String>) -> Self {
        self.phrases
            .push((phrase.into().to_lowercase(), token.into()));
        self
    }

    /// Sets the label announced for a token in the listen prompt.
    pub fn with_friendly_name(mut self, token: impl Into<String>, label: impl Into<String>) -> Self {
        let token = token.into();
        self.friendly_names.retain(|(t, _)| *t != token);
        self.friendly_names.push((token, label.into()));
        self
    }

    /// Maps transcribed text to a command, or `None` when nothing matches.
    pub fn match_text(&self, text: &str) -> Option<Command> {
        let text = text.to_lowercase();
        self.phrases
            .iter()
            .find(|(phrase, _)| text.contains(phrase.as_str()))
            .map(|(_, token)| Command::from_token(token))
    }

    /// Labels announced before listening, in insertion order.
    pub fn friendly_names(&self) -> Vec<&str> {
        self.friendly_names.iter().map(|(_, l)| l.as_str()).collect()
    }

    /// Distinct tokens, in first-seen order.
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = Vec::new();
        for (_, token) in &self.phrases {
            if !tokens.contains(&token.as_str()) {
                tokens.push(token);
            }
        }
        tokens
    }

    /// Returns the number of phrases.
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Returns true if no phrases are registered.
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
