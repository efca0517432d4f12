//! FitSync CLI - Command line interface for syncing a device's fitness data.
//!
//! Drives the sync engine against a SQLite local store and the HTTP
//! cloud store.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fitsync_common::SyncPayload;
use fitsync_storage::{HttpCloudStore, LocalStore, SqliteLocalStore};
use fitsync_sync::{
    export_local_data, import_cloud_data, FileStateStore, MergePolicy, SyncClientState,
    SyncEngine, SyncMode, SyncScheduler,
};

use crate::config::CliConfig;

type Engine = SyncEngine<SqliteLocalStore, HttpCloudStore, FileStateStore>;

#[derive(Parser)]
#[command(name = "fitsync")]
#[command(about = "FitSync - Multi-device sync for fitness data")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: platform config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device identity, sync cursor and local record counts.
    Status,

    /// Print this installation's device id.
    DeviceId,

    /// Pull remote changes, then push the local snapshot.
    Sync,

    /// Pull remote changes only.
    Pull,

    /// Push the local snapshot only.
    Push,

    /// Write the local data as a sync payload.
    Export {
        /// Output file (default: stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Apply a sync payload file to the local data.
    Import {
        /// Payload JSON file.
        file: PathBuf,
    },

    /// Delete all local data and forget the sync cursor.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Sync periodically until interrupted.
    Watch {
        /// Seconds between cycles.
        #[arg(short, long, default_value = "300")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => cmd_status(&config),
        Commands::DeviceId => cmd_device_id(&config),
        Commands::Sync => cmd_sync(&config).await,
        Commands::Pull => cmd_pull(&config).await,
        Commands::Push => cmd_push(&config).await,
        Commands::Export { out } => cmd_export(&config, out.as_deref()),
        Commands::Import { file } => cmd_import(&config, &file),
        Commands::Reset { yes } => cmd_reset(&config, yes),
        Commands::Watch { interval } => cmd_watch(&config, interval).await,
    }
}

fn open_local(config: &CliConfig) -> Result<SqliteLocalStore> {
    let path = config.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteLocalStore::open(&path)
        .with_context(|| format!("Failed to open local store {}", path.display()))
}

fn open_state(config: &CliConfig) -> Result<SyncClientState<FileStateStore>> {
    let path = config.state_path();
    let store = FileStateStore::open(&path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;
    Ok(SyncClientState::new(store))
}

fn open_engine(config: &CliConfig) -> Result<Engine> {
    let local = open_local(config)?;
    let cloud = HttpCloudStore::new(&config.cloud()?).context("Failed to create cloud client")?;
    let state_path = config.state_path();
    let state = FileStateStore::open(&state_path)
        .with_context(|| format!("Failed to open state file {}", state_path.display()))?;

    Ok(SyncEngine::new(
        Arc::new(local),
        Arc::new(cloud),
        state,
        config.sync.clone(),
    ))
}

/// Show sync status.
fn cmd_status(config: &CliConfig) -> Result<()> {
    let state = open_state(config)?;
    let snapshot = state.snapshot().context("Failed to read sync state")?;
    let local = open_local(config)?;
    let counts = local.counts().context("Failed to count local records")?;

    println!("Sync Status:");
    println!("  Device: {}", snapshot.device_id);
    println!(
        "  Server: {}",
        config.server_url.as_deref().unwrap_or("(not configured)")
    );
    println!("  Enabled: {}", config.sync.enabled);
    match snapshot.last_synced_at {
        Some(at) => println!("  Last synced: {}", at),
        None => println!("  Last synced: never"),
    }
    println!("  Local records:");
    for count in counts {
        if count.deleted > 0 {
            println!(
                "    {:<18} {} ({} deleted)",
                count.kind, count.live, count.deleted
            );
        } else {
            println!("    {:<18} {}", count.kind, count.live);
        }
    }

    Ok(())
}

/// Print the device id.
fn cmd_device_id(config: &CliConfig) -> Result<()> {
    let state = open_state(config)?;
    println!("{}", state.device_id());
    Ok(())
}

/// Run one full sync cycle.
async fn cmd_sync(config: &CliConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let report = engine.full_sync().await.context("Sync unavailable")?;

    println!(
        "Sync started {} and took {:?}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration
    );

    match &report.pull {
        Ok(pull) => println!(
            "Pull: {} inserted, {} updated, {} kept local",
            pull.import.inserted, pull.import.updated, pull.import.skipped_stale
        ),
        Err(e) => println!("Pull failed: {}", e),
    }
    match &report.push {
        Ok(push) => println!("Push: {} records sent", push.records_sent),
        Err(e) => println!("Push failed: {}", e),
    }

    if !report.is_success() {
        anyhow::bail!("Sync failed: {}", report.summary());
    }

    println!("Synced at {:?}", engine.last_synced_at()?);
    Ok(())
}

/// Pull remote changes.
async fn cmd_pull(config: &CliConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let summary = engine.pull_from_cloud().await.context("Pull failed")?;

    println!(
        "Pulled: {} inserted, {} updated, {} unchanged, {} kept local",
        summary.import.inserted,
        summary.import.updated,
        summary.import.unchanged,
        summary.import.skipped_stale
    );
    println!("Cursor: {}", summary.synced_at);
    Ok(())
}

/// Push the local snapshot.
async fn cmd_push(config: &CliConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let summary = engine.push_to_cloud().await.context("Push failed")?;

    println!("Pushed {} records", summary.records_sent);
    println!("Cursor: {}", summary.synced_at);
    Ok(())
}

/// Export local data as payload JSON.
fn cmd_export(config: &CliConfig, out: Option<&Path>) -> Result<()> {
    let local = open_local(config)?;
    let payload = export_local_data(&local).context("Failed to export local data")?;
    let json = payload.to_json()?;

    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Exported {} records to {}",
                payload.record_count(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Apply a payload file locally.
fn cmd_import(config: &CliConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let payload = SyncPayload::from_json(&json).context("Invalid payload file")?;

    let local = open_local(config)?;
    let policy = MergePolicy::new(config.sync.merge_strategy);
    let report = import_cloud_data(&local, &payload, &policy).context("Import failed")?;

    println!(
        "Imported: {} inserted, {} updated, {} unchanged, {} kept local",
        report.inserted, report.updated, report.unchanged, report.skipped_stale
    );
    Ok(())
}

/// Clear local data and the cursor. The device id is kept.
fn cmd_reset(config: &CliConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("Reset deletes all local data; re-run with --yes to confirm");
    }

    let local = open_local(config)?;
    local.clear().context("Failed to clear local store")?;
    open_state(config)?
        .reset()
        .context("Failed to reset sync cursor")?;

    println!("Local data cleared. The next sync will download everything.");
    Ok(())
}

/// Sync on an interval until Ctrl-C.
async fn cmd_watch(config: &CliConfig, interval: u64) -> Result<()> {
    if interval == 0 {
        anyhow::bail!("Interval must be at least one second");
    }

    let engine = Arc::new(open_engine(config)?);
    engine.check_available()?;

    let (scheduler, handle) = SyncScheduler::new(SyncMode::Periodic {
        interval: Duration::from_secs(interval),
    });
    let task = tokio::spawn(handle.run_engine(Arc::clone(&engine)));

    info!("Syncing every {}s, press Ctrl-C to stop", interval);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    println!("Stopped. Last status: {:?}", engine.status());
    Ok(())
}
