//! Text-to-speech backends.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::SpeechError;

/// A text-to-speech backend.
///
/// `speak` resolves only after playback has finished. Implementations do
/// not need their own locking; [`SpeechGate`](crate::SpeechGate) serializes
/// calls.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Synthesizes `text` and plays it to completion.
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// Upper bound on a single utterance before the TTS process is killed.
pub const DEFAULT_PLAYBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Speaks by running an external TTS program (`espeak`, `say`, ...) with the
/// text as its last argument. Playback is complete when the process exits.
///
/// A process that outlives the playback timeout, or whose `speak` future is
/// dropped, is killed.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSynthesizer {
    /// Creates a synthesizer running `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_PLAYBACK_TIMEOUT,
        }
    }

    /// Sets the playback timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds fixed arguments placed before the text.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parses a whitespace-separated command line such as `"espeak -s 150"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    /// The program that will be run.
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let run = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| SpeechError::Timeout(self.timeout))?
            .map_err(|e| SpeechError::Synthesis(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Playback(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Headless backend: writes each utterance to the log instead of a speaker.
#[derive(Debug, Clone, Default)]
pub struct TracingSynthesizer;

#[async_trait]
impl SpeechSynthesizer for TracingSynthesizer {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        info!(text = %text, "speak");
        Ok(())
    }
}
