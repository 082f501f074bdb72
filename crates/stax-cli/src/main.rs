//! Stax sync CLI - inspect and drive the sync engine from the terminal
//!
//! Status, conflict audit, device registry, and one-shot sync runs against
//! a local store.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use stax_core::connection::{ConnectionController, ConnectionState, WebSocketTransport};
use stax_core::models::Event;
use stax_core::sync::{SyncContext, SyncHandle, SyncOrchestrator};
use stax_core::{SyncConfig, SyncStore};
use thiserror::Error;
use url::Url;

#[derive(Parser)]
#[command(name = "stax-sync")]
#[command(about = "Inspect and drive Stax event sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local store
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending events, checkpoint, and conflict counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include acknowledged conflicts
        #[arg(long)]
        all: bool,
        /// Acknowledge a conflict by id instead of listing
        #[arg(long, value_name = "ID")]
        ack: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known devices for this store
    Devices {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run sync cycles against a server
    Sync {
        /// Server websocket URL (defaults to STAX_SYNC_URL)
        #[arg(long, value_name = "URL")]
        server: Option<Url>,
        /// User to sync as (defaults to STAX_USER_ID)
        #[arg(long, value_name = "USER")]
        user: Option<String>,
        /// Number of cycles to run before exiting
        #[arg(long, default_value = "1")]
        cycles: u32,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] stax_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No sync server configured. Pass --server or set STAX_SYNC_URL.")]
    MissingServerUrl,
    #[error("No user configured. Pass --user or set STAX_USER_ID.")]
    MissingUser,
    #[error("Could not reach the sync server within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Conflict not found: {0}")]
    ConflictNotFound(i64),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stax=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Conflicts {
            limit,
            all,
            ack,
            json,
        } => run_conflicts(limit, all, ack, json, &db_path).await?,
        Commands::Devices { json } => run_devices(json, &db_path).await?,
        Commands::Sync {
            server,
            user,
            cycles,
        } => run_sync(server, user, cycles, &db_path).await?,
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    pending_events: u64,
    checkpoint: Option<String>,
    last_sync_at: Option<String>,
    unacknowledged_conflicts: u64,
    device_id: Option<String>,
}

async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = SyncStore::open_path(db_path).await?;

    let devices = store.list_devices().await?;
    let report = StatusReport {
        pending_events: store.pending_event_count().await?,
        checkpoint: store.checkpoint().await?.map(format_ms),
        last_sync_at: store.last_sync_at().await?.map(format_ms),
        unacknowledged_conflicts: store.unacknowledged_conflict_count().await?,
        device_id: devices
            .iter()
            .find(|d| d.is_local)
            .map(|d| d.id.to_string()),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "pending events:  {}\ncheckpoint:      {}\nlast sync:       {}\nopen conflicts:  {}\ndevice:          {}",
        report.pending_events,
        report.checkpoint.as_deref().unwrap_or("none (initial sync pending)"),
        report.last_sync_at.as_deref().unwrap_or("never"),
        report.unacknowledged_conflicts,
        report.device_id.as_deref().unwrap_or("not registered"),
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct ConflictListItem {
    id: i64,
    entity_id: String,
    outcome: String,
    local_revision: i64,
    remote_base_revision: i64,
    remote_device_id: Option<String>,
    resolved_at: String,
    acknowledged: bool,
}

async fn run_conflicts(
    limit: usize,
    all: bool,
    ack: Option<i64>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = SyncStore::open_path(db_path).await?;

    if let Some(id) = ack {
        if !store.acknowledge_conflict(id).await? {
            return Err(CliError::ConflictNotFound(id));
        }
        println!("acknowledged conflict {id}");
        return Ok(());
    }

    let conflicts = store.list_conflicts(limit, all).await?;
    let items: Vec<_> = conflicts
        .iter()
        .map(|c| ConflictListItem {
            id: c.id,
            entity_id: c.entity_id.clone(),
            outcome: c.outcome.as_str().to_string(),
            local_revision: c.local_revision,
            remote_base_revision: c.remote_base_revision,
            remote_device_id: c.remote_device_id.clone(),
            resolved_at: format_ms(c.resolved_at),
            acknowledged: c.acknowledged,
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("no conflicts");
        return Ok(());
    }
    for item in items {
        println!(
            "#{} {} {} (local r{}, remote base r{}) from {} at {}",
            item.id,
            item.entity_id,
            item.outcome,
            item.local_revision,
            item.remote_base_revision,
            item.remote_device_id.as_deref().unwrap_or("unknown device"),
            item.resolved_at,
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DeviceListItem {
    id: String,
    user_id: String,
    label: Option<String>,
    is_local: bool,
    last_seen_at: String,
}

async fn run_devices(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = SyncStore::open_path(db_path).await?;

    let devices = store.list_devices().await?;
    let items: Vec<_> = devices
        .iter()
        .map(|d| DeviceListItem {
            id: d.id.to_string(),
            user_id: d.user_id.clone(),
            label: d.label.clone(),
            is_local: d.is_local,
            last_seen_at: format_ms(d.last_seen_at),
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("no devices registered");
        return Ok(());
    }
    for item in items {
        println!(
            "{} {} (user {}, last seen {})",
            item.id,
            if item.is_local { "[local]" } else { "" },
            item.user_id,
            item.last_seen_at,
        );
    }
    Ok(())
}

const CONNECT_WAIT: Duration = Duration::from_secs(15);

async fn run_sync(
    server: Option<Url>,
    user: Option<String>,
    cycles: u32,
    db_path: &Path,
) -> Result<(), CliError> {
    let url = server
        .or_else(|| env::var("STAX_SYNC_URL").ok().and_then(|v| Url::parse(&v).ok()))
        .ok_or(CliError::MissingServerUrl)?;
    let user_id = user
        .or_else(|| env::var("STAX_USER_ID").ok())
        .ok_or(CliError::MissingUser)?;

    let store = SyncStore::open_path(db_path).await?;
    let device = store.ensure_local_device(&user_id, None).await?;
    let context = SyncContext::from(&device);

    let config = SyncConfig::new(url.clone());
    let transport = WebSocketTransport::new(url);
    let (controller, connection, incoming) =
        ConnectionController::new(transport, config.connection());
    tokio::spawn(controller.run());

    // the CLI has no domain layer; remote events are recorded in the log
    // by the engine and surfaced here for the operator
    let apply = |event: &Event| {
        tracing::info!(
            id = %event.id,
            entity = %event.entity_id,
            kind = ?event.kind(),
            "applied remote event"
        );
        Ok(())
    };

    let sync_interval = config.sync_interval;
    let (mut orchestrator, handle, _conflicts) =
        SyncOrchestrator::new(store, context, connection, incoming, apply, config);

    wait_for_connection(&handle).await?;

    for cycle in 0..cycles {
        let outcome = orchestrator.sync_cycle().await?;
        if outcome.skipped_offline {
            println!("cycle {}: offline, skipped", cycle + 1);
        } else {
            println!(
                "cycle {}: pushed {}, applied {}, conflicts {}, dropped {}",
                cycle + 1,
                outcome.pushed,
                outcome.applied,
                outcome.conflicts,
                outcome.dropped,
            );
        }
        if cycle + 1 < cycles {
            tokio::time::sleep(sync_interval).await;
        }
    }

    handle.shutdown();
    Ok(())
}

async fn wait_for_connection(handle: &SyncHandle) -> Result<(), CliError> {
    tokio::time::timeout(CONNECT_WAIT, async {
        while handle.connection_state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .map_err(|_| CliError::ConnectTimeout(CONNECT_WAIT))
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STAX_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stax")
        .join("stax.db")
}

fn format_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || format!("{timestamp_ms}ms"),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stax_core::models::ConflictOutcome;

    #[test]
    fn test_resolve_db_path_prefers_cli_argument() {
        let explicit = resolve_db_path(Some(PathBuf::from("/tmp/custom.db")));
        assert_eq!(explicit, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn test_default_db_path_ends_with_store_name() {
        let path = default_db_path();
        assert!(path.ends_with("stax/stax.db"));
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(1_717_200_000_000), "2024-06-01 00:00:00 UTC");
    }

    #[test]
    fn test_outcome_labels_are_stable() {
        assert_eq!(ConflictOutcome::RemoteWins.as_str(), "remote-wins");
        assert_eq!(ConflictOutcome::Unresolved.as_str(), "unresolved");
    }
}
