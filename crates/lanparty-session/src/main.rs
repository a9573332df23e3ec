//! LAN Party matchmaking node: entry point.
//!
//! Searches the local subnet for a session, joins it if one answers, and
//! otherwise hosts one and announces it until the room is full.
//!
//! # Usage
//!
//! ```text
//! lanparty [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   Config file [default: platform config directory]
//!   --capacity  <N>      Players per room, host included
//!   --game-port <PORT>   TCP port the game session hosts on
//!   --log-level <LEVEL>  error | warn | info | debug | trace
//! ```
//!
//! Options override the config file; `RUST_LOG` overrides `--log-level`.
//! Ctrl-C cancels a running attempt, or leaves the session once it started.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanparty_session::application::coordinator::{MatchOutcome, SessionCoordinator};
use lanparty_session::application::runtime::NetworkSessionRuntime;
use lanparty_session::infrastructure::network::create_discovery;
use lanparty_session::infrastructure::runtime::TcpSessionRuntime;
use lanparty_session::infrastructure::storage::config::{config_file_path, load_config};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN Party matchmaking node.
#[derive(Debug, Parser)]
#[command(
    name = "lanparty",
    about = "Find or host a game session on the local network",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "LANPARTY_CONFIG")]
    config: Option<PathBuf>,

    /// Players per room, host included.
    #[arg(long, env = "LANPARTY_CAPACITY")]
    capacity: Option<u32>,

    /// TCP port the game session hosts on.
    #[arg(long, env = "LANPARTY_GAME_PORT")]
    game_port: Option<u16>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "LANPARTY_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config_file_path().context("no config path given and no platform default")?,
    };
    let mut config =
        load_config(&path).with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(capacity) = cli.capacity {
        config.session.capacity = capacity;
    }
    if let Some(port) = cli.game_port {
        config.session.game_port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("LAN Party starting (config {})", path.display());

    let discovery = create_discovery(&config.discovery)?;
    let runtime = Arc::new(TcpSessionRuntime::new());
    let coordinator = SessionCoordinator::new(
        discovery,
        runtime.clone(),
        config.session.coordinator_config()?,
    );

    let outcome = tokio::select! {
        outcome = coordinator.start_matchmaking(config.session.capacity) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            coordinator.cancel().await;
            MatchOutcome::Cancelled
        }
    };

    match outcome {
        MatchOutcome::Cancelled => info!("matchmaking cancelled"),
        MatchOutcome::Joined { endpoint } => {
            info!("joined the session at {endpoint}.  Press Ctrl-C to leave.");
            tokio::signal::ctrl_c().await?;
            coordinator.cancel().await;
        }
        MatchOutcome::GameStarting => {
            info!("game starting.  Press Ctrl-C to end the session.");
            tokio::signal::ctrl_c().await?;
            coordinator.cancel().await;
        }
    }

    runtime.shutdown().await;
    info!("LAN Party stopped");
    Ok(())
}
