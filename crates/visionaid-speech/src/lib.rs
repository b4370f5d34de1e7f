//! Speech input and output for VisionAID.
//!
//! - [`SpeechGate`]: the single playback path. Every component speaks through
//!   it; utterances never overlap and failures never reach the caller.
//! - [`SpeechSynthesizer`]: text-to-speech backend trait, with
//!   [`CommandSynthesizer`] (external TTS program) and
//!   [`TracingSynthesizer`] (headless).
//! - [`Recognizer`]: speech-to-text backend trait, with [`LineRecognizer`]
//!   which treats each input line as a transcription.

pub mod error;
pub mod gate;
pub mod recognizer;
pub mod synth;

pub use error::{RecognitionError, SpeechError};
pub use gate::SpeechGate;
pub use recognizer::{LineRecognizer, Recognizer};
pub use synth::{
    CommandSynthesizer, SpeechSynthesizer, TracingSynthesizer, DEFAULT_PLAYBACK_TIMEOUT,
};
