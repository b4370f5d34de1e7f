//! Error types for speech operations.

use thiserror::Error;

/// Text-to-speech failures. Logged by the gate, never propagated further.
#[derive(Error, Debug)]
pub enum SpeechError {
    /// The backend could not produce audio.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Audio was produced but playback failed.
    #[error("playback failed: {0}")]
    Playback(String),

    /// Playback did not finish in time; the process was killed.
    #[error("playback timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error talking to the backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Speech-to-text failures. None of these are fatal to the voice loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Nothing was heard before the listen timeout.
    #[error("listen timed out")]
    Timeout,

    /// Audio was captured but could not be transcribed.
    #[error("speech not understood")]
    NotUnderstood,

    /// The recognition service is unreachable.
    #[error("recognition service unavailable: {0}")]
    Unavailable(String),

    /// The input source is gone for good.
    #[error("voice input closed")]
    Closed,
}

impl RecognitionError {
    /// What to say to the user after this failure.
    pub fn prompt(&self) -> &'static str {
        match self {
            RecognitionError::Timeout => "I didn't hear anything. Please try again.",
            RecognitionError::NotUnderstood => "Sorry, I didn't understand that.",
            RecognitionError::Unavailable(_) => "Speech service unavailable.",
            RecognitionError::Closed => "Voice input closed.",
        }
    }
}
