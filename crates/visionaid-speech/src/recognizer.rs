//! Speech-to-text backends.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::error::RecognitionError;

/// A speech recognizer.
///
/// `listen` captures one utterance and transcribes it. `Ok(None)` means
/// nothing was heard. Callers bound the call with their own timeout, so
/// implementations must be cancel safe.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Listens for one utterance.
    async fn listen(&self) -> Result<Option<String>, RecognitionError>;
}

/// Treats each line of an input stream as a finished transcription.
///
/// Used for keyboard-driven sessions and tests. Blank lines count as
/// silence; end of input is [`RecognitionError::Closed`].
pub struct LineRecognizer<R> {
    lines: Mutex<Lines<R>>,
}

impl<R: AsyncBufRead + Unpin + Send> LineRecognizer<R> {
    /// Reads transcriptions from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }
}

impl LineRecognizer<BufReader<Stdin>> {
    /// Reads transcriptions from standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Recognizer for LineRecognizer<R> {
    async fn listen(&self) -> Result<Option<String>, RecognitionError> {
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim();
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text.to_lowercase()))
                }
            }
            Ok(None) => Err(RecognitionError::Closed),
            Err(e) => Err(RecognitionError::Unavailable(e.to_string())),
        }
    }
}
