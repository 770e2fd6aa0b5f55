//! shelf-daemon: keeps a reading list vault in sync with its git remote.
//!
//! Makes sure the vault has a working copy, then runs the sync coordinator
//! on its timer until Ctrl+C. With `--once` it runs a single cycle and exits.

use anyhow::{Context, Result};
use clap::Parser;
use shelf_core::{Config, CycleOutcome, ReadingService};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shelf-daemon")]
#[command(about = "Git sync daemon for a markdown reading list")]
struct Args {
    /// Path to the vault directory (overrides SHELF_VAULT_PATH)
    #[arg(short, long)]
    vault: Option<PathBuf>,

    /// Seconds between sync cycles (overrides SHELF_SYNC_INTERVAL)
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Run one sync cycle and exit
    #[arg(long)]
    once: bool,

    /// Initialise a fresh repository with the configured remote instead of cloning it
    #[arg(long)]
    init: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,shelf_core=debug"
    } else {
        "info,shelf_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(vault) = args.vault {
        config.vault_path = vault;
    }
    if let Some(secs) = args.interval {
        config.sync_interval = Duration::from_secs(secs);
    }

    info!("Starting shelf-daemon");
    info!("Vault path: {:?}", config.vault_path);
    match &config.vault_repo {
        Some(repo) => info!("Remote: {}", repo),
        None => info!("No remote configured, vault is local only"),
    }

    let service = ReadingService::from_config(&config);
    let coordinator = service
        .coordinator()
        .cloned()
        .context("Service has no sync coordinator")?;

    if args.init {
        coordinator.init_repository().await?;
    } else {
        coordinator.ensure_repository().await?;
    }

    let stats = service.statistics().await?;
    info!(
        "{} records ({} to read, {} reading, {} done)",
        stats.total, stats.to_read, stats.reading, stats.done
    );

    if args.once {
        let outcome = coordinator.run_cycle().await?;
        match outcome {
            CycleOutcome::NoChanges => info!("Nothing to sync"),
            CycleOutcome::NothingToCommit => info!("No committable changes"),
            CycleOutcome::Pushed { changes } => info!("Synced {} change(s)", changes),
        }
        return Ok(());
    }

    // Catch up once before handing over to the timer
    if let Err(e) = coordinator.run_cycle().await {
        warn!("Initial sync failed: {}", e);
    }

    let handle = coordinator.start(config.sync_interval);
    let mut state_rx = coordinator.subscribe();

    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("Sync state: {:?}", *state_rx.borrow_and_update());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Lets an in-flight cycle finish its commit/push
    handle.stop().await;
    info!("Shutting down");
    Ok(())
}
