//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build version string with git hash and build date.
fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const BUILD_DATE: &str = env!("BUILD_DATE");

    // Format: "0.1.0 (abc1234, 2026-01-29)"
    static VERSION_STRING: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} ({}, {})", VERSION, GIT_HASH, BUILD_DATE))
}

/// VisionAID - voice-driven coordinator for assistive vision agents
#[derive(Parser, Debug)]
#[command(name = "visionaid")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to state directory
    #[arg(short, long, env = "VISIONAID_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator, reading voice commands from stdin
    Run {
        /// Bus address to listen on (overrides VISIONAID_BUS_ADDR)
        #[arg(short, long)]
        bus: Option<String>,

        /// Log utterances instead of speaking them
        #[arg(short, long)]
        muted: bool,

        /// Agent to start immediately
        #[arg(short, long)]
        agent: Option<String>,

        /// Text-to-speech program; the text is passed as the last argument
        #[arg(long, env = "VISIONAID_TTS_COMMAND", default_value = "espeak")]
        tts_command: String,
    },

    /// Publish one event to a running coordinator
    Publish {
        /// Agent tag (barcode, document, object, emotion, ...)
        #[arg(short, long)]
        agent: String,

        /// Event payload as a JSON object
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Producing subsystem
        #[arg(long, default_value = "vision")]
        source: String,

        /// Bus address of the coordinator
        #[arg(short, long, env = "VISIONAID_BUS_ADDR", default_value = visionaid_events::DEFAULT_BUS_ADDR)]
        bus: String,
    },

    /// Print persisted events or errors
    Log {
        /// Only events from this agent tag
        #[arg(short, long)]
        agent: Option<String>,

        /// Maximum rows to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print the error log instead of events
        #[arg(short, long)]
        errors: bool,
    },

    /// List configured agents
    Agents,
}

impl Cli {
    /// Returns the state directory path, using default if not specified.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".visionaid"))
                .unwrap_or_else(|| PathBuf::from(".visionaid"))
        })
    }

    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
