//! Engine assembly, recovery, and the TCP accept loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use cinder_core::{Engine, KeyspaceConfig, SessionContext};
use cinder_persistence::{AofLog, FsyncPolicy, SnapshotStore};

/// Everything needed to boot a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub server_id: String,
    pub keyspace: KeyspaceConfig,
    /// Directory for snapshot and log files. `None` disables persistence.
    pub data_dir: Option<PathBuf>,
    /// Whether to keep an append-only command log.
    pub append_only: bool,
    pub fsync: FsyncPolicy,
    /// How often the active TTL sampler runs.
    pub sampler_interval: Duration,
}

/// Builds the engine, recovers persisted state, starts the sampler,
/// and runs the accept loop.
pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Engine::builder(config.server_id.clone())
        .keyspace_config(config.keyspace.clone());

    let mut snapshots: Option<Arc<SnapshotStore>> = None;
    if let Some(dir) = &config.data_dir {
        let store = Arc::new(SnapshotStore::open(dir)?);
        builder = builder.snapshot_sink(store.clone());
        snapshots = Some(store);

        if config.append_only {
            let aof = AofLog::open(dir.join("cinder.aof"), config.fsync)?;
            builder = builder.command_log(aof);
        }
    }

    let engine = builder.build();
    recover(&engine, &config, snapshots.as_deref())?;

    // active TTL sampler
    {
        let engine = engine.clone();
        let mut tick = tokio::time::interval(config.sampler_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                tick.tick().await;
                let removed = tokio::task::block_in_place(|| engine.sweep_expired());
                if removed > 0 {
                    info!(removed, "expired keys swept");
                }
            }
        });
    }

    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, server_id = %config.server_id, "listening");

    let next_connection_id = Arc::new(AtomicU64::new(1));
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        let connection_id = next_connection_id.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            if let Err(e) = crate::connection::handle(stream, peer, connection_id, engine).await {
                error!(%peer, "connection error: {e}");
            }
        });
    }
}

/// Loads the snapshot, then replays the command log through the
/// dispatcher. A malformed log record is fatal to the replay loop only:
/// recovery stops there and the server starts with what it has.
fn recover(
    engine: &Arc<Engine>,
    config: &ServerConfig,
    snapshots: Option<&SnapshotStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(store) = snapshots {
        match store.load() {
            Ok(Some(data)) => {
                let count = data.entries.len();
                for entry in data.entries {
                    engine.restore(entry.key, entry.value, entry.expire_at_ms);
                }
                info!(keys = count, taken_at_ms = data.taken_at_ms, "snapshot loaded");
            }
            Ok(None) => {}
            Err(e) => warn!("snapshot load failed, starting empty: {e}"),
        }
    }

    let Some(dir) = &config.data_dir else {
        return Ok(());
    };
    if !config.append_only {
        return Ok(());
    }

    let records = AofLog::read_records(&dir.join("cinder.aof"))?;
    let total = records.len();
    let ctx = SessionContext::background(config.server_id.clone());
    let mut replayed = 0usize;
    for record in records {
        match engine.handle_command(&ctx, &record, None, true, true) {
            Ok(_) => replayed += 1,
            Err(e) => {
                error!(replayed, total, "log replay aborted: {e}");
                break;
            }
        }
    }
    if replayed > 0 {
        info!(replayed, "command log replayed");
    }
    Ok(())
}
