//! sessionmgr - headless story session manager
//!
//! Main entry point for the sessionmgr CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use sessionmgr_config::LoggingConfig;

mod commands;
mod headless;
mod script;
mod session;

use commands::{config, run, stories};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// sessionmgr - headless story session manager
#[derive(Parser)]
#[command(name = "sessionmgr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(long, global = true, env = "SESSIONMGR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a script of story command batches
    Run(run::RunArgs),

    /// List stories after applying a script
    Stories(stories::StoriesArgs),

    /// Inspect or initialize configuration
    Config(config::ConfigArgs),
}

const CRATES: &[&str] = &[
    "sessionmgr",
    "sessionmgr_config",
    "sessionmgr_ops",
    "sessionmgr_storage",
    "sessionmgr_story",
];

fn crate_filter(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.push(fallback.to_string());
    directives.join(",")
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = match &cli.config {
        Some(path) => (sessionmgr_config::load_config_file(path)?, Vec::new()),
        None => {
            let loaded = sessionmgr_config::load_config(None).context("failed to load config")?;
            (loaded.config, loaded.warnings)
        }
    };

    let _guard = init_tracing(&config.logging_section(), cli.verbose);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Stories(args) => stories::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Console (human-readable, stderr) plus rotating JSON file.
fn init_tracing(
    logging: &LoggingConfig,
    verbose: bool,
) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let console_filter = match (&logging.filter, verbose) {
        (_, true) => crate_filter("debug", "info"),
        (Some(filter), false) => filter.clone(),
        (None, false) => crate_filter("info", "warn"),
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_filter));

    let log_dir = logging
        .log_dir
        .clone()
        .or_else(|| dirs::data_local_dir().map(|d| d.join("sessionmgr").join("logs")))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sessionmgr.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(crate_filter("trace", "info"))),
        )
        .init();

    guard
}
