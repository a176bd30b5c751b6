//! Backing store server binary
//!
//! Standalone shared-memory object store service. Clients normally launch it
//! through the library (`shm-store -s <socket> -m <bytes>`), but it can also
//! run on its own, optionally from a TOML config file.

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use kvstores::config::Config;
use kvstores::shm::process::default_store_size;
use kvstores::shm::{ShmServer, ShmServerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shm-store")]
#[command(about = "Shared-memory object store server", long_about = None)]
struct Args {
    /// Unix socket path to bind
    #[arg(short = 's', long = "socket")]
    socket: Option<PathBuf>,

    /// Capacity in bytes (default: 70% of available shared memory)
    #[arg(short = 'm', long = "memory")]
    memory: Option<u64>,

    /// TOML configuration file; command-line flags win over its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Some(Config::load(path).with_context(|| format!("loading {}", path.display()))?),
        None => None,
    };

    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let socket_path = match args
        .socket
        .or_else(|| config.as_ref().map(|c| c.store.socket.clone()))
    {
        Some(path) => path,
        None => bail!("a socket path is required (-s or --config)"),
    };

    let capacity = match args.memory.or_else(|| config.as_ref().and_then(|c| c.store.capacity)) {
        Some(bytes) => bytes,
        None => default_store_size()?,
    };

    log::info!("starting object store server");
    log::info!("  socket: {}", socket_path.display());
    log::info!("  capacity: {} bytes", capacity);

    let server = ShmServer::bind(ShmServerConfig {
        socket_path,
        capacity,
    })
    .context("failed to bind object store socket")?;

    server.run().context("server error")?;
    Ok(())
}
