//! wonderlandd - The wonderland IPC server
//!
//! Wires together:
//! - Configuration loading (file, env and command-line overrides)
//! - Logging
//! - The IPC server on the well-known socket
//! - Signal-driven shutdown

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wonderland_config::{load_config, ServerConfig};
use wonderland_ipc::IpcServer;
use wonderland_util::{default_config_path, PROTOCOL_VERSION, WONDERLAND_SOCKET_ENV};

/// wonderlandd - rabbit hole allocator for a single trusted peer
#[derive(Parser, Debug)]
#[command(name = "wonderlandd")]
#[command(about = "Local IPC server handing out secondary channels", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/wonderland/config.toml, used if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path override (or set WONDERLAND_SOCKET env var)
    #[arg(short, long, env = WONDERLAND_SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Directory secondary channels are created in
    #[arg(long)]
    channel_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Resolve the effective configuration.
///
/// An explicit `--config` must load; the default path is only used if it exists.
fn resolve_config(args: &Args) -> Result<ServerConfig> {
    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(&path)
                    .with_context(|| format!("Failed to load config from {:?}", path))?
            } else {
                info!(path = %path.display(), "No config file, using defaults");
                ServerConfig::default()
            }
        }
    };

    let config = match &args.socket {
        Some(socket) => config.with_socket_path(socket),
        None => config,
    };

    Ok(match &args.channel_dir {
        Some(dir) => config.with_channel_dir(dir),
        None => config,
    })
}

async fn run(config: ServerConfig) -> Result<()> {
    let server: IpcServer<Bytes> = IpcServer::new(config);
    let handle = server
        .start()
        .with_context(|| format!("Failed to start IPC server on {:?}", server.config().socket_path))?;

    info!(
        socket_path = %handle.socket_path().display(),
        channel_dir = %server.config().channel_dir.display(),
        channel_prefix = %server.config().channel_prefix,
        protocol_version = PROTOCOL_VERSION,
        "IPC server started"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down"),
    }

    let channels = server.channels().len();
    let events = server.broadcasts().occupied();
    if events > 0 {
        warn!(events, "Dropping unremoved broadcast events");
    }
    info!(channels, "Shutting down");

    handle.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "wonderlandd starting");

    let config = resolve_config(&args)?;
    run(config).await
}
