//! SpeechGate - the single, serialized path to the speaker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::synth::SpeechSynthesizer;

/// Serializes all spoken feedback through one synthesizer.
///
/// `speak` holds the playback lock for the whole synthesis + playback window,
/// so two utterances never overlap no matter which task calls it. The tokio
/// mutex is fair, so queued utterances play in call order.
///
/// Failures are logged and counted; `speak` itself never fails.
pub struct SpeechGate {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: Mutex<()>,
    failures: AtomicU64,
}

impl SpeechGate {
    /// Creates a gate around `synthesizer`.
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synthesizer,
            playback: Mutex::new(()),
            failures: AtomicU64::new(0),
        }
    }

    /// Speaks `text`, returning once playback has completed.
    ///
    /// Blank text is skipped.
    pub async fn speak(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let _playback = self.playback.lock().await;
        debug!(text = %text, "speaking");

        if let Err(e) = self.synthesizer.speak(text).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                synthesizer = %self.synthesizer.name(),
                error = %e,
                "speech failed"
            );
        }
    }

    /// Number of utterances that failed since creation.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
