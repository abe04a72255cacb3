//! Quizline CLI
//!
//! Runs the reconciliation daemon: opens the store, wires the external
//! clients, and ticks the scheduler until shutdown. The quiz operations
//! themselves are served by the request layer embedding
//! [`quizline_engine::QuizService`]; this binary only owns the single
//! process-resident periodic job.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use quizline_assess::EngageClient;
use quizline_engine::{Config, Reconciler};
use quizline_store::Store;
use tracing_subscriber::EnvFilter;

/// Quizline - conversational quiz reconciliation daemon
///
/// Polls for quiz sessions that stalled before answering their first
/// question and fires a one-time re-engagement message for each.
#[derive(Parser, Debug)]
#[command(name = "quizline")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: quizline.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Path to the SQLite database (overrides the configured path)
    #[arg(short, long, value_name = "FILE")]
    database: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Quizline starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, opens the store, and runs the scheduler loop until
/// ctrl-c. An in-flight tick always finishes before the process exits.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Apply CLI argument overrides
    if let Some(ref database) = args.database {
        config.database_path.clone_from(database);
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    tracing::info!(path = %config.database_path, "Opening store");
    let store = Arc::new(Store::open(&config.database_path)?);

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let engage = EngageClient::new(config.engage_url.clone(), timeout);
    let reconciler = Reconciler::new(
        store,
        engage,
        Duration::from_secs(config.tick_interval_secs),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for shutdown signal");
        }
    };

    println!("Reconciliation scheduler running (ctrl-c to stop)");
    reconciler.run(shutdown).await;
    println!("Shutdown complete");
    Ok(())
}

/// Loads configuration from the given path, or from the current directory.
fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: {}\n\nSuggestion: Check the --config path or run without it to use quizline.json",
                    path.display()
                );
            }
            Config::load_from_file(&path)?
        }
        None => Config::load()?,
    };
    Ok(config)
}

/// Prints a short configuration summary.
fn print_config(config: &Config) {
    println!("Quizline configuration:");
    println!("  Database:       {}", config.database_path);
    println!("  Assess backend: {}", config.assess_base_url);
    println!("  Engage URL:     {}", config.engage_url);
    println!("  Tick interval:  {}s", config.tick_interval_secs);
    println!("  Call timeout:   {}s", config.request_timeout_secs);
}
