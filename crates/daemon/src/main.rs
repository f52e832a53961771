//! Meshsync Daemon
//!
//! Keeps the local VPN daemon's topology in sync with the peer registry.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod control;
mod discovery;
mod http;
mod mesh;
mod registry;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "meshsyncd")]
#[command(about = "Meshsync daemon - keeps mesh VPN topology in sync with the peer registry")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/meshsync/config.toml")]
    config: PathBuf,

    /// Node name to register and advertise under
    #[arg(short, long)]
    node: Option<String>,

    /// VPN network name
    #[arg(long)]
    net: Option<String>,

    /// Registry endpoints, comma separated
    #[arg(short, long, value_delimiter = ',')]
    registry: Option<Vec<String>>,

    /// Metrics listen address
    #[arg(long)]
    metrics_addr: Option<String>,

    /// VPN configuration root directory
    #[arg(long)]
    conf_dir: Option<PathBuf>,

    /// Mesh-internal address to publish for this node
    #[arg(long, env = "MESHSYNC_NODE_ADDRESS")]
    node_address: Option<std::net::IpAddr>,

    /// Underlay endpoint to publish for this node
    #[arg(long, env = "MESHSYNC_NODE_ENDPOINT")]
    node_endpoint: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Meshsync daemon v{}", meshsync_common::VERSION);

    // Load configuration; CLI flags override the file
    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(node) = cli.node {
        config.node_name = node;
    }
    if let Some(net) = cli.net {
        config.net_name = net;
    }
    if let Some(registry) = cli.registry {
        config.registry_endpoints = registry;
    }
    if let Some(metrics_addr) = cli.metrics_addr {
        config.metrics_listen = metrics_addr;
    }
    if let Some(conf_dir) = cli.conf_dir {
        config.conf_dir = conf_dir;
    }
    if cli.node_address.is_some() {
        config.node_address = cli.node_address;
    }
    if cli.node_endpoint.is_some() {
        config.node_endpoint = cli.node_endpoint;
    }

    info!(
        "node {} on network {} ({} as VPN daemon)",
        config.node_name, config.net_name, config.vpn_process
    );

    let metrics = Arc::new(meshsync_common::Metrics::new());
    let cancel = CancellationToken::new();

    // Cancel everything on SIGINT/SIGTERM
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    // The registry is required; refuse to start blind
    let registry = registry::Registry::connect(&config.registry_endpoints).await?;
    info!("connected to registry at {:?}", config.registry_endpoints);

    let metrics_addr: std::net::SocketAddr = config.metrics_listen.parse()?;
    let http_handle = tokio::spawn(http::serve(metrics_addr, metrics.clone(), cancel.clone()));

    let signaler = Arc::new(mesh::ProcessSignaler::new(config.vpn_process.clone()));
    let mesh = mesh::MeshManager::new(&config, signaler, metrics.clone(), cancel.clone());
    let control = control::ControlLoop::new(config, registry, mesh, metrics, cancel.clone());

    let result = control.run().await;
    cancel.cancel();

    match http_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("metrics endpoint error: {}", e),
        Err(e) => error!("metrics task panicked: {}", e),
    }

    result?;
    info!("daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("cannot install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
