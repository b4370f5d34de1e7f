//! End-to-end tests for the coordinator: lifecycle ordering, busy
//! suppression, the event pipeline over TCP and the voice loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::BufReader;
use tokio::sync::Notify;
use tokio::time::Instant;

use visionaid_events::BusPublisher;
use visionaid_models::EventRecord;
use visionaid_persistence::{EventLog, LogQuery};
use visionaid_runtime::{
    AgentError, AgentHandle, AgentState, BlockingAgent, BusyFlag, Coordinator, DetachableAgent,
    LifecycleError, RuntimeConfig, RuntimeError, NOT_RECOGNIZED_PROMPT, UNKNOWN_AGENT_PROMPT,
};
use visionaid_speech::{
    LineRecognizer, RecognitionError, Recognizer, SpeechError, SpeechGate, SpeechSynthesizer,
};

// -- test doubles -----------------------------------------------------------

/// Records every utterance and the largest number of overlapping playbacks.
#[derive(Default)]
struct RecordingSynth {
    spoken: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingSynth {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    fn name(&self) -> &str {
        "recording"
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.spoken.lock().unwrap().push(text.to_string());
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared timeline of agent calls: (call, time, busy flag at the time).
#[derive(Default)]
struct Timeline {
    entries: Mutex<Vec<(String, Instant, bool)>>,
    busy: Mutex<Option<BusyFlag>>,
}

impl Timeline {
    fn record(&self, call: String) {
        let busy = self
            .busy
            .lock()
            .unwrap()
            .as_ref()
            .map(BusyFlag::is_busy)
            .unwrap_or(false);
        self.entries.lock().unwrap().push((call, Instant::now(), busy));
    }

    fn calls(&self) -> Vec<String> {
        self.entries.lock().unwrap().iter().map(|e| e.0.clone()).collect()
    }

    fn entry(&self, call: &str) -> (Instant, bool) {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.0 == call)
            .map(|e| (e.1, e.2))
            .unwrap_or_else(|| panic!("no call {}", call))
    }
}

/// Detachable agent that logs its calls.
struct Recorded {
    name: &'static str,
    timeline: Arc<Timeline>,
}

#[async_trait]
impl DetachableAgent for Recorded {
    async fn run_detached(&self) -> Result<(), AgentError> {
        self.timeline.record(format!("run:{}", self.name));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), AgentError> {
        self.timeline.record(format!("terminate:{}", self.name));
        Ok(())
    }
}

/// Blocking agent that runs until cancelled, counting how many of its kind
/// run at once.
struct Exclusive {
    name: &'static str,
    timeline: Arc<Timeline>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockingAgent for Exclusive {
    async fn run(&self) -> Result<(), AgentError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(self.running.clone());
        self.timeline.record(format!("run:{}", self.name));
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), AgentError> {
        self.timeline.record(format!("terminate:{}", self.name));
        Ok(())
    }
}

/// Detachable agent whose start blocks until released.
struct Gated {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DetachableAgent for Gated {
    async fn run_detached(&self) -> Result<(), AgentError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Recognizer that counts listens and never hears anything useful.
#[derive(Default)]
struct CountingRecognizer {
    listens: AtomicUsize,
}

#[async_trait]
impl Recognizer for CountingRecognizer {
    async fn listen(&self) -> Result<Option<String>, RecognitionError> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

// -- helpers ----------------------------------------------------------------

struct Harness {
    coordinator: Coordinator,
    synth: Arc<RecordingSynth>,
    log: Arc<EventLog>,
}

fn harness(config: RuntimeConfig) -> Harness {
    let synth = Arc::new(RecordingSynth::default());
    let speech = Arc::new(SpeechGate::new(synth.clone()));
    let log = Arc::new(EventLog::open_in_memory().unwrap());
    let coordinator = Coordinator::new(config, log.clone(), speech);
    Harness {
        coordinator,
        synth,
        log,
    }
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig::new()
        .with_bus_addr("127.0.0.1:0")
        .with_settle_interval(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(20))
        .with_listen_timeout(Duration::from_millis(200))
        .with_announce_commands(false)
}

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("test data must be an object"),
    }
}

/// Polls `condition` for up to two seconds.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// -- lifecycle --------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_switch_terminates_previous_before_starting_next() {
    let h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    *timeline.busy.lock().unwrap() = Some(h.coordinator.lifecycle().busy_flag());

    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    h.coordinator
        .register(
            "barcode_scanner",
            AgentHandle::blocking(Exclusive {
                name: "H1",
                timeline: timeline.clone(),
                running: running.clone(),
                max_running: max_running.clone(),
            }),
        )
        .unwrap();
    h.coordinator
        .register(
            "object_detection",
            AgentHandle::detachable(Recorded {
                name: "H2",
                timeline: timeline.clone(),
            }),
        )
        .unwrap();

    assert!(!h.coordinator.lifecycle().is_busy());
    h.coordinator.switch_to("barcode_scanner").await.unwrap();
    // Let H1's run task start.
    tokio::time::sleep(Duration::from_millis(1)).await;
    h.coordinator.switch_to("object_detection").await.unwrap();
    assert!(!h.coordinator.lifecycle().is_busy());

    assert_eq!(timeline.calls(), vec!["run:H1", "terminate:H1", "run:H2"]);
    let (_, busy_at_terminate) = timeline.entry("terminate:H1");
    let (_, busy_at_run) = timeline.entry("run:H2");
    assert!(busy_at_terminate);
    assert!(busy_at_run);

    assert_eq!(running.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.coordinator.lifecycle().state_of("barcode_scanner"),
        Some(AgentState::Terminated)
    );
    assert_eq!(
        h.coordinator.lifecycle().state_of("object_detection"),
        Some(AgentState::Running)
    );
    assert_eq!(
        h.synth.spoken(),
        vec!["Switched to barcode scanner", "Switched to object detection"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_waits_settle_interval() {
    let h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    for name in ["document_reader", "navigation"] {
        h.coordinator
            .register(
                name,
                AgentHandle::detachable(Recorded {
                    name,
                    timeline: timeline.clone(),
                }),
            )
            .unwrap();
    }

    h.coordinator.switch_to("document_reader").await.unwrap();
    h.coordinator.switch_to("navigation").await.unwrap();

    let (stopped_at, _) = timeline.entry("terminate:document_reader");
    let (started_at, _) = timeline.entry("run:navigation");
    assert!(started_at.duration_since(stopped_at) >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_agent_running() {
    let h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let names = ["object_detection", "barcode_scanner", "document_reader"];
    for name in names {
        h.coordinator
            .register(
                name,
                AgentHandle::blocking(Exclusive {
                    name,
                    timeline: timeline.clone(),
                    running: running.clone(),
                    max_running: max_running.clone(),
                }),
            )
            .unwrap();
    }

    let lifecycle = h.coordinator.lifecycle().clone();
    let switches: Vec<_> = (0..12)
        .map(|i| {
            let lifecycle = lifecycle.clone();
            let name = names[i % names.len()];
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(7 * i as u64)).await;
                lifecycle.switch_to(name).await
            })
        })
        .collect();

    for switch in switches {
        switch.await.unwrap().unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(running.load(Ordering::SeqCst), 1);
    let active = lifecycle
        .agents()
        .into_iter()
        .filter(|a| a.state == AgentState::Running)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_agent_leaves_current_running() {
    let h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    h.coordinator
        .register(
            "navigation",
            AgentHandle::detachable(Recorded {
                name: "navigation",
                timeline: timeline.clone(),
            }),
        )
        .unwrap();
    h.coordinator.switch_to("navigation").await.unwrap();

    let result = h.coordinator.switch_to("nonexistent").await;

    assert!(matches!(
        result,
        Err(RuntimeError::Lifecycle(LifecycleError::UnknownAgent(_)))
    ));
    assert_eq!(h.coordinator.lifecycle().current().as_deref(), Some("navigation"));
    assert_eq!(
        h.coordinator.lifecycle().state_of("navigation"),
        Some(AgentState::Running)
    );
    assert_eq!(timeline.calls(), vec!["run:navigation"]);
    assert_eq!(h.synth.spoken().last().map(String::as_str), Some(UNKNOWN_AGENT_PROMPT));
    assert_eq!(h.log.error_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminating_terminated_agent_is_harmless() {
    let h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    for name in ["a", "b"] {
        h.coordinator
            .register(
                name,
                AgentHandle::detachable(Recorded {
                    name,
                    timeline: timeline.clone(),
                }),
            )
            .unwrap();
    }
    h.coordinator.switch_to("a").await.unwrap();
    h.coordinator.switch_to("b").await.unwrap();
    assert_eq!(h.coordinator.lifecycle().state_of("a"), Some(AgentState::Terminated));

    let report = h.coordinator.lifecycle().shutdown_all().await;
    assert!(report.is_clean());
    assert_eq!(h.coordinator.lifecycle().state_of("a"), Some(AgentState::Terminated));
    assert_eq!(h.coordinator.lifecycle().state_of("b"), Some(AgentState::Terminated));

    let again = h.coordinator.lifecycle().shutdown_all().await;
    assert!(again.is_clean());
    assert_eq!(h.log.error_count().unwrap(), 0);
}

// -- voice ------------------------------------------------------------------

#[tokio::test]
async fn test_busy_flag_suppresses_voice_loop() {
    let mut h = harness(test_config());
    let gated = Arc::new(Gated {
        entered: Notify::new(),
        release: Notify::new(),
    });
    h.coordinator
        .register("ecommerce_agent", AgentHandle::Detachable(gated.clone()))
        .unwrap();
    h.coordinator.voice_switch().set_armed(false);

    let recognizer = Arc::new(CountingRecognizer::default());
    h.coordinator.start(Some(recognizer.clone())).await.unwrap();

    let lifecycle = h.coordinator.lifecycle().clone();
    let transition = tokio::spawn(async move { lifecycle.switch_to("ecommerce_agent").await });
    gated.entered.notified().await;

    h.coordinator.voice_switch().set_armed(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recognizer.listens.load(Ordering::SeqCst), 0);

    gated.release.notify_one();
    transition.await.unwrap().unwrap();
    wait_for(|| recognizer.listens.load(Ordering::SeqCst) > 0).await;

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_unrecognized_phrase_switches_nothing() {
    let mut h = harness(test_config());
    let timeline = Arc::new(Timeline::default());
    h.coordinator
        .register(
            "navigation",
            AgentHandle::detachable(Recorded {
                name: "navigation",
                timeline: timeline.clone(),
            }),
        )
        .unwrap();

    let recognizer = Arc::new(LineRecognizer::new(BufReader::new(&b"banana\n"[..])));
    h.coordinator.start(Some(recognizer)).await.unwrap();

    let synth = h.synth.clone();
    wait_for(|| synth.spoken().iter().any(|s| s == NOT_RECOGNIZED_PROMPT)).await;

    assert_eq!(h.coordinator.dispatch_tick().await, 0);
    assert!(h.coordinator.lifecycle().current().is_none());
    assert!(timeline.calls().is_empty());

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_spoken_command_switches_and_exit_shuts_down() {
    let mut h = harness(test_config().with_settle_interval(Duration::from_millis(10)));
    let timeline = Arc::new(Timeline::default());
    h.coordinator
        .register(
            "barcode_scanner",
            AgentHandle::detachable(Recorded {
                name: "barcode",
                timeline: timeline.clone(),
            }),
        )
        .unwrap();

    let recognizer = Arc::new(LineRecognizer::new(BufReader::new(
        &b"scan code please\nexit\n"[..],
    )));
    h.coordinator.start(Some(recognizer)).await.unwrap();

    for _ in 0..200 {
        h.coordinator.dispatch_tick().await;
        if h.coordinator.exit_requested() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.coordinator.exit_requested());
    assert_eq!(timeline.calls(), vec!["run:barcode", "terminate:barcode"]);
    assert!(h.log.is_closed());
    assert_eq!(
        h.synth.spoken().last().map(String::as_str),
        Some("Shutting down all systems")
    );
}

// -- event pipeline ---------------------------------------------------------

#[tokio::test]
async fn test_object_event_over_bus() {
    let mut h = harness(test_config());
    let addr = h.coordinator.start(None).await.unwrap();

    let mut publisher = BusPublisher::connect(addr).await.unwrap();
    let mut record = EventRecord::new(
        "vision",
        "object",
        data(json!({"objects": ["cup", "phone", "book", "pen"]})),
    );
    record.timestamp = 1_700_000_000.25;
    publisher.publish(&record).await.unwrap();

    let log = h.log.clone();
    wait_for(|| log.count().unwrap_or(0) == 1).await;
    let synth = h.synth.clone();
    wait_for(|| !synth.spoken().is_empty()).await;

    assert_eq!(h.synth.spoken(), vec!["Detected objects: cup, phone, book"]);
    let rows = h.log.query(&LogQuery::new().with_agent("object")).unwrap();
    assert_eq!(rows[0].data["objects"], json!(["cup", "phone", "book", "pen"]));
    assert_eq!(rows[0].timestamp, 1_700_000_000.25);
    assert_eq!(rows[0].source, "vision");

    let status = h.coordinator.render_status();
    assert!(status.iter().any(|l| l.starts_with("  object: 4 objects (")));

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_malformed_event_does_not_stop_consumer() {
    let mut h = harness(test_config());
    let addr = h.coordinator.start(None).await.unwrap();

    let mut publisher = BusPublisher::connect(addr).await.unwrap();
    publisher.publish_raw(r#"{"agent":"barcode"}"#).await.unwrap();
    publisher
        .publish_raw(r#"{"source":"vision","agent":"barcode","data":{"code":"0123456789012","product":"Oat Milk"}}"#)
        .await
        .unwrap();

    let log = h.log.clone();
    wait_for(|| log.count().unwrap_or(0) == 1).await;

    assert_eq!(h.log.error_count().unwrap(), 1);
    let synth = h.synth.clone();
    wait_for(|| synth.spoken().iter().any(|s| s == "Barcode scanned: Oat Milk")).await;

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_failing_reaction_still_logs_event() {
    let mut h = harness(test_config());
    let addr = h.coordinator.start(None).await.unwrap();

    let mut publisher = BusPublisher::connect(addr).await.unwrap();
    publisher
        .publish_raw(r#"{"agent":"emotion","data":{"top_emotion":"happy","confidence":"high"}}"#)
        .await
        .unwrap();
    publisher
        .publish_raw(r#"{"agent":"navigation","data":{"instruction":"turn left"}}"#)
        .await
        .unwrap();

    let log = h.log.clone();
    wait_for(|| log.count().unwrap_or(0) == 2).await;

    assert_eq!(h.log.error_count().unwrap(), 1);
    assert_eq!(
        h.log
            .query(&LogQuery::new().with_agent("emotion"))
            .unwrap()
            .len(),
        1
    );
    assert!(h.synth.spoken().is_empty());

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_speech_never_overlaps_across_components() {
    let mut h = harness(test_config().with_settle_interval(Duration::from_millis(10)));
    let timeline = Arc::new(Timeline::default());
    h.coordinator
        .register(
            "document_reader",
            AgentHandle::detachable(Recorded {
                name: "document",
                timeline: timeline.clone(),
            }),
        )
        .unwrap();
    let addr = h.coordinator.start(None).await.unwrap();

    let mut publisher = BusPublisher::connect(addr).await.unwrap();
    for i in 0..5 {
        publisher
            .publish(&EventRecord::new(
                "vision",
                "barcode",
                data(json!({"product": format!("item {}", i)})),
            ))
            .await
            .unwrap();
    }
    h.coordinator.switch_to("document_reader").await.unwrap();

    let synth = h.synth.clone();
    wait_for(|| synth.spoken().len() == 6).await;

    assert_eq!(h.synth.max_active.load(Ordering::SeqCst), 1);
    assert!(h
        .synth
        .spoken()
        .contains(&"Switched to document reader".to_string()));

    h.coordinator.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let mut h = harness(test_config().with_settle_interval(Duration::from_millis(10)));
    let timeline = Arc::new(Timeline::default());
    for name in ["navigation", "ecommerce_agent"] {
        h.coordinator
            .register(
                name,
                AgentHandle::detachable(Recorded {
                    name,
                    timeline: timeline.clone(),
                }),
            )
            .unwrap();
    }
    let addr = h.coordinator.start(None).await.unwrap();
    h.coordinator.switch_to("navigation").await.unwrap();

    let report = h.coordinator.shutdown_all().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.terminated.len(), 2);
    assert!(h.coordinator.status_board().is_cleared());
    assert!(h.log.is_closed());
    assert!(h.coordinator.lifecycle().current().is_none());

    // The bus is no longer consumed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(mut publisher) = BusPublisher::connect(addr).await {
        let _ = publisher
            .publish(&EventRecord::new("vision", "barcode", Map::new()))
            .await;
    }
    assert!(h.log.count().is_err());
}
