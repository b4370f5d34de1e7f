//! Command handlers for CLI subcommands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use visionaid_events::BusPublisher;
use visionaid_models::EventRecord;
use visionaid_persistence::{EventLog, LogQuery};
use visionaid_runtime::{
    load_definitions, write_example_definitions, AgentDefinition, Coordinator, RuntimeConfig,
    AGENTS_FILE,
};
use visionaid_speech::{
    CommandSynthesizer, LineRecognizer, SpeechGate, SpeechSynthesizer, TracingSynthesizer,
};

use crate::cli::Commands;
use crate::LOG_FILE;

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// How often the run loop drains the command queue.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Execute a CLI command.
pub async fn execute(command: Commands, state_dir: &Path) -> Result<()> {
    match command {
        Commands::Run {
            bus,
            muted,
            agent,
            tts_command,
        } => cmd_run(state_dir, bus, muted, agent, &tts_command).await,
        Commands::Publish {
            agent,
            data,
            source,
            bus,
        } => cmd_publish(&agent, &data, &source, &bus).await,
        Commands::Log {
            agent,
            limit,
            errors,
        } => cmd_log(state_dir, agent.as_deref(), limit, errors),
        Commands::Agents => cmd_agents(state_dir),
    }
}

async fn cmd_run(
    state_dir: &Path,
    bus: Option<String>,
    muted: bool,
    agent: Option<String>,
    tts_command: &str,
) -> Result<()> {
    let definitions = require_definitions(state_dir)?;

    let mut config = RuntimeConfig::from_env();
    if let Some(bus) = bus {
        config = config.with_bus_addr(bus);
    }

    let log = Arc::new(EventLog::open(state_dir.join(LOG_FILE))?);
    let speech = Arc::new(SpeechGate::new(synthesizer(muted, tts_command)?));

    let mut coordinator = Coordinator::new(config, log, speech);
    coordinator.register_definitions(&definitions)?;

    let addr = coordinator
        .start(Some(Arc::new(LineRecognizer::stdin())))
        .await?;
    println!("Listening for agent events on {}", addr);
    println!("Type a command (\"barcode\", \"navigate\", \"exit\", ...) and press Enter.\n");

    if let Some(agent) = agent {
        if let Err(e) = coordinator.switch_to(&agent).await {
            warn!(agent = %agent, error = %e, "initial agent did not start");
        }
    }

    let updates = coordinator.events().subscribe();
    let mut ticker = tokio::time::interval(DISPATCH_INTERVAL);
    let mut shown_revision = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            _ = ticker.tick() => {}
        }

        coordinator.dispatch_tick().await;
        if coordinator.exit_requested() {
            break;
        }

        let revision = coordinator.status_board().revision();
        let mut changed = shown_revision != Some(revision);
        while updates.try_recv().is_ok() {
            changed = true;
        }
        if changed {
            shown_revision = Some(revision);
            print_board(&coordinator.render_status());
        }
    }

    let report = coordinator.shutdown_all().await?;
    for (name, error) in &report.failures {
        eprintln!("Failed to stop {}: {}", name, error);
    }
    println!("Stopped {} agent(s).", report.terminated.len());
    Ok(())
}

/// Loads `agents.json`, writing the example file if there is none.
fn require_definitions(state_dir: &Path) -> Result<Vec<AgentDefinition>> {
    let path = state_dir.join(AGENTS_FILE);
    if let Some(definitions) = load_definitions(&path)? {
        return Ok(definitions);
    }

    write_example_definitions(&path)?;
    Err(format!(
        "No agent definitions found. Wrote an example to {}; edit it and run again.",
        path.display()
    )
    .into())
}

fn synthesizer(muted: bool, tts_command: &str) -> Result<Arc<dyn SpeechSynthesizer>> {
    if muted {
        return Ok(Arc::new(TracingSynthesizer));
    }
    let synth = CommandSynthesizer::from_command_line(tts_command)
        .ok_or("TTS command must not be empty (use --muted to disable speech)")?;
    Ok(Arc::new(synth))
}

fn print_board(lines: &[String]) {
    println!("{}", "-".repeat(40));
    for line in lines {
        println!("{}", line);
    }
}

async fn cmd_publish(agent: &str, data: &str, source: &str, bus: &str) -> Result<()> {
    let data = match serde_json::from_str::<Value>(data)? {
        Value::Object(map) => map,
        other => return Err(format!("--data must be a JSON object, got {}", other).into()),
    };

    let record = EventRecord::new(source, agent, data);
    let mut publisher = BusPublisher::connect(bus).await?;
    publisher.publish(&record).await?;

    info!(agent = %agent, bus = %bus, "event published");
    println!("Published {} event to {}", agent, bus);
    Ok(())
}

fn cmd_log(state_dir: &Path, agent: Option<&str>, limit: usize, errors: bool) -> Result<()> {
    let path = state_dir.join(LOG_FILE);
    if !path.exists() {
        println!("No event log at {}", path.display());
        return Ok(());
    }
    let log = EventLog::open(&path)?;

    if errors {
        let entries = log.errors(Some(limit))?;
        if entries.is_empty() {
            println!("No errors logged.");
        }
        for entry in entries {
            println!("{}  {}", format_timestamp(entry.timestamp), entry.message);
        }
        return Ok(());
    }

    let mut query = LogQuery::new().with_limit(limit);
    if let Some(agent) = agent {
        query = query.with_agent(agent);
    }
    let events = log.query(&query)?;
    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!("{:<19}  {:<10}  {:<18}  DATA", "TIME", "SOURCE", "AGENT");
    println!("{}", "-".repeat(80));
    for event in &events {
        println!(
            "{:<19}  {:<10}  {:<18}  {}",
            format_timestamp(event.timestamp),
            truncate(&event.source, 10),
            truncate(&event.agent, 18),
            truncate(&event.data.to_string(), 60)
        );
    }
    println!("\n{} event(s)", events.len());
    Ok(())
}

fn cmd_agents(state_dir: &Path) -> Result<()> {
    let path = state_dir.join(AGENTS_FILE);
    let Some(definitions) = load_definitions(&path)? else {
        println!("No agent definitions at {}", path.display());
        println!("Run `visionaid run` once to write an example file.");
        return Ok(());
    };

    println!("{:<24}  {:<9}  COMMAND", "NAME", "MODE");
    println!("{}", "-".repeat(70));
    for def in &definitions {
        let command = format!("{} {}", def.command, def.args.join(" "));
        println!("{:<24}  {:<9}  {}", def.name, def.mode, command.trim());
        if let Some(description) = &def.description {
            println!("{:<24}  {:<9}  {}", "", "", description);
        }
    }
    println!("\n{} agent(s)", definitions.len());
    Ok(())
}

/// Formats epoch seconds as local time.
fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| format!("{:.3}", timestamp))
}

/// Truncates a string to the given length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_definitions_write_example() {
        let dir = tempdir().unwrap();

        let result = require_definitions(dir.path());

        assert!(result.is_err());
        assert!(dir.path().join(AGENTS_FILE).exists());
        assert_eq!(require_definitions(dir.path()).unwrap().len(), 6);
    }

    #[test]
    fn test_cmd_log_without_database() {
        let dir = tempdir().unwrap();
        cmd_log(dir.path(), None, 10, false).unwrap();
        assert!(!dir.path().join(LOG_FILE).exists());
    }

    #[test]
    fn test_cmd_log_reads_rows() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path().join(LOG_FILE)).unwrap();
        log.insert(&EventRecord::new("vision", "barcode", serde_json::Map::new()))
            .unwrap();
        log.log_error("Error handling message: bad payload").unwrap();
        log.close().unwrap();

        cmd_log(dir.path(), Some("barcode"), 10, false).unwrap();
        cmd_log(dir.path(), None, 10, true).unwrap();
    }

    #[test]
    fn test_cmd_agents_empty() {
        let dir = tempdir().unwrap();
        cmd_agents(dir.path()).unwrap();
    }

    #[test]
    fn test_muted_synthesizer() {
        assert_eq!(synthesizer(true, "").unwrap().name(), "tracing");
        assert_eq!(synthesizer(false, "espeak -s 150").unwrap().name(), "espeak");
        assert!(synthesizer(false, "   ").is_err());
    }

    #[tokio::test]
    async fn test_publish_rejects_non_object() {
        let result = cmd_publish("barcode", "[1,2]", "vision", "127.0.0.1:1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let subscriber = visionaid_events::BusSubscriber::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = subscriber.local_addr().unwrap().to_string();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(subscriber.run(tx, shutdown_rx));

        cmd_publish("barcode", r#"{"product":"Oat Milk"}"#, "vision", &addr)
            .await
            .unwrap();

        match rx.recv().await {
            Some(visionaid_events::BusMessage::Payload(line)) => {
                let record = EventRecord::from_json(&line).unwrap();
                assert_eq!(record.agent, "barcode");
                assert_eq!(record.data["product"], "Oat Milk");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hi", 2), "hi");
    }
}
