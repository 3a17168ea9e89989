mod config;
mod connection;
mod server;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::error;

/// An in-memory key/value server speaking the RESP2 protocol.
#[derive(Debug, Parser)]
#[command(name = "cinder-server", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Identity of this node in replication envelopes.
    #[arg(long, default_value = "cinder-0")]
    server_id: String,

    /// Memory limit, e.g. "512M" or "2G". Unlimited when absent.
    #[arg(long)]
    max_memory: Option<String>,

    /// Eviction policy once the memory limit is reached.
    #[arg(long, default_value = "noeviction")]
    eviction_policy: String,

    /// Keys sampled per active-expiration cycle.
    #[arg(long)]
    eviction_sample: Option<usize>,

    /// How often the active TTL sampler runs, in milliseconds.
    #[arg(long, default_value_t = 100)]
    sampler_interval_ms: u64,

    /// Directory for snapshot and append-only log files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep an append-only log of mutations (requires --data-dir).
    #[arg(long)]
    append_only: bool,

    /// When to fsync the append-only log: always, everysec, or no.
    #[arg(long, default_value = "everysec")]
    fsync: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    if let Err(e) = runtime.block_on(server::run(config)) {
        error!("server exited: {e}");
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Result<server::ServerConfig, String> {
    let max_memory = args
        .max_memory
        .as_deref()
        .map(config::parse_byte_size)
        .transpose()?;
    let eviction_policy = config::parse_eviction_policy(&args.eviction_policy)?;
    let fsync = config::parse_fsync_policy(&args.fsync)?;

    if args.append_only && args.data_dir.is_none() {
        return Err("--append-only requires --data-dir".into());
    }

    Ok(server::ServerConfig {
        addr: SocketAddr::new(args.bind, args.port),
        server_id: args.server_id.clone(),
        keyspace: config::build_keyspace_config(max_memory, eviction_policy, args.eviction_sample),
        data_dir: args.data_dir.clone(),
        append_only: args.append_only,
        fsync,
        sampler_interval: Duration::from_millis(args.sampler_interval_ms),
    })
}
