//! statechart - run statechart definitions from the command line.
//!
//! `run` loads a definition, feeds it JSON-lines events and prints a
//! snapshot after each one. `check` only loads and validates.

mod builtins;
mod config;
mod runner;

use clap::{Parser, Subcommand};
use config::Config;
use runner::RunOptions;
use statechart_core::StateMachineEngine;
use statechart_loader::Loader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statechart")]
#[command(about = "Run hierarchical state machine definitions")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "STATECHART_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a definition against a stream of events
    Run {
        /// Definition file (.json, .yaml or .yml)
        definition: PathBuf,

        /// JSON-lines event file (defaults to stdin)
        #[arg(short, long)]
        events: Option<PathBuf>,
    },

    /// Load and validate a definition
    Check {
        /// Definition file (.json, .yaml or .yml)
        definition: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Snapshots go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    let loader = builtins::register(Loader::new());

    match cli.command {
        Commands::Check { definition } => {
            let loaded = loader.from_path(&definition)?;

            let mut ids: Vec<&str> = loaded.state_ids().collect();
            ids.sort_unstable();

            println!(
                "{}: ok ({} states, initial '{}')",
                definition.display(),
                ids.len(),
                loaded.initial
            );
            for id in ids {
                let depth = loaded.ancestry(id).map_or(0, |a| a.len() - 1);
                let events = loaded.events_from(id);
                println!("  {}{} [{}]", "  ".repeat(depth), id, events.join(", "));
            }
        }

        Commands::Run { definition, events } => {
            let loaded = Arc::new(loader.from_path(&definition)?);
            let engine = StateMachineEngine::with_config(loaded, config.engine.engine_config())?;

            tracing::info!(
                engine = %engine.id(),
                definition = %definition.display(),
                "running"
            );

            let input: Box<dyn AsyncRead + Unpin + Send> = match &events {
                Some(path) => Box::new(tokio::fs::File::open(path).await?),
                None => Box::new(tokio::io::stdin()),
            };
            let options = RunOptions {
                pretty: config.output.pretty,
                settle: config.engine.settle(),
            };

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let summary =
                runner::run_events(&engine, BufReader::new(input), &mut out, &options).await?;

            if summary.rejected > 0 {
                tracing::warn!("{} event(s) rejected", summary.rejected);
            }
        }
    }

    Ok(())
}
