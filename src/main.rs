//! Binary entrypoint for the drawhall orchestrator.
//!
//! Commands:
//! - `start [--config <path>]` - hydrate all configured rooms and run until signaled
//! - `init-config [--config <path>]` - write a default configuration file
//! - `status [--config <path>]` - print the current stage of every configured room

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use drawhall::config::Config;
use drawhall::events::EventSpine;
use drawhall::manager::GameManager;
use drawhall::repository::CompositeRepository;

#[derive(Parser)]
#[command(name = "drawhall")]
#[command(about = "Game-flow orchestrator for a live-dealer lottery product")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "drawhall.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Hydrate all configured rooms and run until signaled
    Start,
    /// Write a default configuration file
    InitConfig,
    /// Print the current stage of every configured room
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        init_logging(None, cli.verbose);
        Config::create_default(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(Some(&config), cli.verbose);

    let manager = build_manager(&config)?;

    match cli.command {
        Commands::Start => {
            info!("drawhall v{} starting", env!("CARGO_PKG_VERSION"));
            manager.start().await?;
            info!("hydrated {} room(s); running", manager.supported_rooms().len());
            spawn_cache_sweeper(
                manager.clone(),
                Duration::from_secs(config.storage.cache_sweep_interval_seconds),
            );
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, exiting");
        }
        Commands::Status => {
            manager.start().await?;
            for room in manager.supported_rooms() {
                match manager.get_current_stage(room).await {
                    Ok(stage) => println!("{room}: {stage:?}"),
                    Err(e) => warn!("failed to read status for room {room}: {e}"),
                }
            }
        }
        Commands::InitConfig => unreachable!("handled above"),
    }

    Ok(())
}

fn build_manager(config: &Config) -> Result<std::sync::Arc<GameManager>> {
    let repo = CompositeRepository::open_at_paths(&config.storage.cache_path, &config.storage.durable_path, "drawhall")
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to open storage at cache={} durable={}: {e}",
                config.storage.cache_path,
                config.storage.durable_path
            )
        })?;
    Ok(GameManager::new(
        repo,
        EventSpine::new(),
        config.orchestrator.supported_rooms.clone(),
        config.orchestrator.default_room.clone(),
        config.orchestrator.ball_pool_size,
        config.stages.to_duration_map(),
    ))
}

/// Periodically sweep expired cache entries in the background, per
/// `cache_sweep_interval_seconds`. Runs for the life of the process.
fn spawn_cache_sweeper(manager: std::sync::Arc<GameManager>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match manager.sweep_expired_cache() {
                Ok(removed) if removed > 0 => info!("cache sweep removed {removed} expired entries"),
                Ok(_) => {}
                Err(e) => warn!("cache sweep failed: {e}"),
            }
        }
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    let level = config
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(base_level);
    builder.filter_level(level);
    if config.map(|c| c.logging.force_plain).unwrap_or(false) {
        builder.format_timestamp(None).format_target(false);
    }
    let _ = builder.try_init();
}
