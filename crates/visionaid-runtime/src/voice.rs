//! Voice dispatch loop: listens for spoken commands and queues them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use visionaid_models::{Command, Vocabulary};
use visionaid_speech::{RecognitionError, Recognizer, SpeechGate};

use crate::busy::BusyFlag;
use crate::config::RuntimeConfig;

/// Spoken when a transcription matches no command.
pub const NOT_RECOGNIZED_PROMPT: &str = "Command not recognized. Please try again.";

/// What the voice loop hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceMessage {
    /// A recognized command.
    Command(Command),
    /// Recognition failed; shown as a status error, never acted on.
    Error(RecognitionError),
}

/// Disabled/Armed switch for the voice loop.
///
/// Toggling only gates whether a new listen starts; it never interrupts
/// one in flight.
#[derive(Debug, Clone, Default)]
pub struct VoiceSwitch(Arc<AtomicBool>);

impl VoiceSwitch {
    pub fn new(armed: bool) -> Self {
        Self(Arc::new(AtomicBool::new(armed)))
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_armed(&self, armed: bool) {
        self.0.store(armed, Ordering::SeqCst);
    }

    /// Flips the switch and returns the new state.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::SeqCst)
    }
}

/// Result of one listen attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// A command was matched and queued.
    Queued(Command),
    /// Text was heard but matched nothing.
    NotRecognized(String),
    /// Nothing heard before the timeout.
    Silence,
    /// Recognition failed; an error marker was queued.
    Failed(RecognitionError),
    /// The recognizer has no more input.
    Closed,
}

/// Background loop turning speech into [`VoiceMessage`]s.
///
/// On every poll tick it listens once, but only while armed and while no
/// agent transition is in progress. It never calls the lifecycle manager
/// itself; everything goes through the queue.
pub struct VoiceDispatcher {
    recognizer: Arc<dyn Recognizer>,
    vocabulary: Vocabulary,
    speech: Arc<SpeechGate>,
    busy: BusyFlag,
    switch: VoiceSwitch,
    queue: mpsc::Sender<VoiceMessage>,
    poll_interval: Duration,
    listen_timeout: Duration,
    announce_commands: bool,
}

impl VoiceDispatcher {
    /// Creates a dispatcher; timing comes from `config`.
    pub fn new(
        config: &RuntimeConfig,
        recognizer: Arc<dyn Recognizer>,
        speech: Arc<SpeechGate>,
        busy: BusyFlag,
        switch: VoiceSwitch,
        queue: mpsc::Sender<VoiceMessage>,
    ) -> Self {
        Self {
            recognizer,
            vocabulary: Vocabulary::standard(),
            speech,
            busy,
            switch,
            queue,
            poll_interval: config.poll_interval,
            listen_timeout: config.listen_timeout,
            announce_commands: config.announce_commands,
        }
    }

    /// Replaces the command vocabulary.
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Whether a new listen may start now.
    pub fn may_listen(&self) -> bool {
        self.switch.is_armed() && !self.busy.is_busy()
    }

    /// Runs until shutdown, until the recognizer closes, or until the queue
    /// consumer goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "starting voice loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.may_listen() {
                        trace!(armed = self.switch.is_armed(), "voice loop idle");
                        continue;
                    }
                    match self.listen_once().await {
                        ListenOutcome::Closed => {
                            info!("voice input closed");
                            break;
                        }
                        _ if self.queue.is_closed() => break,
                        _ => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("voice loop received shutdown signal");
                        break;
                    }
                }
            }
        }

        debug!("voice loop stopped");
    }

    /// Performs one bounded listen and handles the result.
    pub async fn listen_once(&self) -> ListenOutcome {
        if self.announce_commands {
            let names = self.vocabulary.friendly_names().join(", ");
            self.speech.speak(&format!("Say a command: {}", names)).await;
        }

        let heard = match tokio::time::timeout(self.listen_timeout, self.recognizer.listen()).await {
            Ok(result) => result,
            Err(_) => Err(RecognitionError::Timeout),
        };

        match heard {
            Ok(Some(text)) => match self.vocabulary.match_text(&text) {
                Some(command) => {
                    info!(text = %text, command = %command, "voice command recognized");
                    if self.queue.send(VoiceMessage::Command(command.clone())).await.is_err() {
                        warn!("command queue closed");
                    }
                    ListenOutcome::Queued(command)
                }
                None => {
                    debug!(text = %text, "no command matched");
                    self.speech.speak(NOT_RECOGNIZED_PROMPT).await;
                    ListenOutcome::NotRecognized(text)
                }
            },
            Ok(None) | Err(RecognitionError::Timeout) => {
                trace!("nothing heard");
                self.speech.speak(RecognitionError::Timeout.prompt()).await;
                ListenOutcome::Silence
            }
            Err(RecognitionError::Closed) => ListenOutcome::Closed,
            Err(e) => {
                warn!(error = %e, "speech recognition failed");
                self.speech.speak(e.prompt()).await;
                if self.queue.send(VoiceMessage::Error(e.clone())).await.is_err() {
                    warn!("command queue closed");
                }
                ListenOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use visionaid_speech::{SpeechError, SpeechSynthesizer};

    #[derive(Default)]
    struct Spoken(StdMutex<Vec<String>>);

    #[async_trait]
    impl SpeechSynthesizer for Spoken {
        fn name(&self) -> &str {
            "spoken"
        }

        async fn speak(&self, text: &str) -> Result<(), SpeechError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Replays scripted results, then reports the input closed.
    struct Scripted(StdMutex<VecDeque<Result<Option<String>, RecognitionError>>>);

    impl Scripted {
        fn new(script: Vec<Result<Option<String>, RecognitionError>>) -> Self {
            Self(StdMutex::new(script.into()))
        }
    }

    #[async_trait]
    impl Recognizer for Scripted {
        async fn listen(&self) -> Result<Option<String>, RecognitionError> {
            let next = self.0.lock().unwrap().pop_front();
            next.unwrap_or(Err(RecognitionError::Closed))
        }
    }

    /// Never hears anything.
    struct Deaf;

    #[async_trait]
    impl Recognizer for Deaf {
        async fn listen(&self) -> Result<Option<String>, RecognitionError> {
            std::future::pending().await
        }
    }

    fn dispatcher(
        recognizer: Arc<dyn Recognizer>,
        announce: bool,
    ) -> (VoiceDispatcher, mpsc::Receiver<VoiceMessage>, Arc<Spoken>, BusyFlag) {
        let config = RuntimeConfig::new()
            .with_poll_interval(Duration::from_millis(500))
            .with_listen_timeout(Duration::from_secs(5))
            .with_announce_commands(announce);
        let spoken = Arc::new(Spoken::default());
        let speech = Arc::new(SpeechGate::new(spoken.clone()));
        let busy = BusyFlag::new();
        let (tx, rx) = mpsc::channel(8);
        let dispatcher =
            VoiceDispatcher::new(&config, recognizer, speech, busy.clone(), VoiceSwitch::new(true), tx);
        (dispatcher, rx, spoken, busy)
    }

    #[tokio::test]
    async fn test_recognized_command_is_queued() {
        let recognizer = Arc::new(Scripted::new(vec![Ok(Some("please scan code".into()))]));
        let (dispatcher, mut rx, spoken, _) = dispatcher(recognizer, true);

        let outcome = dispatcher.listen_once().await;

        let expected = Command::SwitchTo("barcode_scanner".into());
        assert_eq!(outcome, ListenOutcome::Queued(expected.clone()));
        assert_eq!(rx.try_recv().unwrap(), VoiceMessage::Command(expected));
        let spoken = spoken.0.lock().unwrap();
        assert!(spoken[0].starts_with("Say a command: Object Detection, Barcode Scanner"));
    }

    #[tokio::test]
    async fn test_unrecognized_phrase_prompts_and_queues_nothing() {
        let recognizer = Arc::new(Scripted::new(vec![Ok(Some("banana".into()))]));
        let (dispatcher, mut rx, spoken, _) = dispatcher(recognizer, false);

        let outcome = dispatcher.listen_once().await;

        assert_eq!(outcome, ListenOutcome::NotRecognized("banana".into()));
        assert!(rx.try_recv().is_err());
        assert_eq!(spoken.0.lock().unwrap().as_slice(), [NOT_RECOGNIZED_PROMPT]);
    }

    #[tokio::test]
    async fn test_recognition_error_queues_marker() {
        let recognizer = Arc::new(Scripted::new(vec![Err(RecognitionError::Unavailable(
            "offline".into(),
        ))]));
        let (dispatcher, mut rx, spoken, _) = dispatcher(recognizer, false);

        let outcome = dispatcher.listen_once().await;

        assert!(matches!(outcome, ListenOutcome::Failed(RecognitionError::Unavailable(_))));
        assert!(matches!(
            rx.try_recv().unwrap(),
            VoiceMessage::Error(RecognitionError::Unavailable(_))
        ));
        assert_eq!(
            spoken.0.lock().unwrap().as_slice(),
            ["Speech service unavailable."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_is_bounded_by_timeout() {
        let (dispatcher, mut rx, spoken, _) = dispatcher(Arc::new(Deaf), false);

        let start = tokio::time::Instant::now();
        let outcome = dispatcher.listen_once().await;

        assert_eq!(outcome, ListenOutcome::Silence);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            spoken.0.lock().unwrap().as_slice(),
            ["I didn't hear anything. Please try again."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_suppresses_listening() {
        let recognizer = Arc::new(Scripted::new(vec![Ok(Some("exit".into()))]));
        let (dispatcher, mut rx, _, busy) = dispatcher(recognizer.clone(), false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let _guard = busy.raise();
        assert!(!dispatcher.may_listen());

        let handle = tokio::spawn(dispatcher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(recognizer.0.lock().unwrap().len(), 1);

        drop(_guard);
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(message, Some(VoiceMessage::Command(Command::Exit)));

        // Script exhausted: the recognizer reports closed and the loop ends.
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_loop_stops_on_shutdown() {
        let recognizer = Arc::new(Scripted::new(vec![Ok(Some("navigate".into()))]));
        let (dispatcher, mut rx, _, _) = dispatcher(recognizer, false);
        dispatcher.switch.set_armed(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(dispatcher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());
    }

    #[test]
    fn test_voice_switch_toggle() {
        let switch = VoiceSwitch::new(false);
        let view = switch.clone();

        assert!(switch.toggle());
        assert!(view.is_armed());
        assert!(!switch.toggle());
        assert!(!view.is_armed());
    }
}
