//! VisionAID CLI entry point.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use visionaid_cli::cli::Cli;
use visionaid_cli::commands;

/// How long exit waits for blocked tasks (such as the stdin reader).
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn main() {
    // Load .env.local if it exists (for VISIONAID_* overrides)
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));

    fmt().with_env_filter(filter).with_target(false).init();

    let state_dir = cli.state_dir();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(commands::execute(cli.command, &state_dir));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
