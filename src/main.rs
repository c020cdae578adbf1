use chatdesk::config::{Config, ConfigOverrides};
use chatdesk::jsonfile::{self, LoadOutcome};
use chatdesk::{AppState, router};
use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatdesk")]
#[command(about = "chatdesk - JSON-file record store with CRUD over HTTP and a logged chat proxy")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file (default: <config dir>/chatdesk/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve(ConfigOverrides),

    /// Report whether a collection file parses
    Check {
        /// Collection file to inspect
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(overrides) => {
            let mut config = Config::load(cli.config.as_deref())?;
            config.apply(&overrides);
            serve(config).await
        }
        Commands::Check { file } => check(&file),
    }
}

async fn serve(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tokio::signal::ctrl_c()))
        .await
        .context("Server error")?;

    Ok(())
}

/// Resolves once `signal` fires, or at once if it could not be installed
async fn shutdown_signal(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("Shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
    }
}

fn check(file: &Path) -> Result<()> {
    match jsonfile::read_records(file).with_context(|| format!("Failed to read {}", file.display()))? {
        LoadOutcome::Missing => {
            println!("{} {} does not exist (it will be created as [])", "missing".yellow(), file.display());
        }
        LoadOutcome::Loaded(records) => {
            let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
            println!(
                "{} {}: {} records, max id {}",
                "ok".green(),
                file.display(),
                records.len(),
                max_id
            );
        }
        LoadOutcome::Malformed(e) => {
            println!("{} {}: {}", "malformed".red().bold(), file.display(), e);
            process::exit(1);
        }
    }
    Ok(())
}
