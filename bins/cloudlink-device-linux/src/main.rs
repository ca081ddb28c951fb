mod cloud;
mod config;
mod radio;
mod region;
mod runner;
mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use cloudlink_core::channel_transport;
use cloudlink_web::PortalState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::HostConfig;
use crate::runner::{CloudMode, Runner};

/// Portal requests waiting for the control loop.
const PORTAL_QUEUE: usize = 8;

/// Run a cloudlink device on a Linux host.
#[derive(Debug, Parser)]
#[command(name = "cloudlink-device", version, about)]
struct Args {
    /// TOML configuration file. Compiled defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File holding the 512-byte credential block.
    #[arg(short, long, default_value = "cloudlink-credentials.bin")]
    region: PathBuf,

    /// Use the local demo cloud instead of the realtime database.
    #[arg(long)]
    demo: bool,

    /// Portal HTTP address. Defaults to all interfaces on the portal port.
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,cloudlink_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    let http_addr = args
        .http_addr
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.device.portal.port)));
    let cloud = if args.demo {
        CloudMode::Demo
    } else {
        if !config.device.cloud.is_configured() {
            tracing::warn!("Cloud API key or database URL missing, the cloud session will not start (try --demo)");
        }
        CloudMode::Rest
    };

    tracing::info!("cloudlink device v{} starting...", env!("CARGO_PKG_VERSION"));

    let (client, mut transport) = channel_transport(PORTAL_QUEUE);
    let runner = Runner::new(config, args.region, cloud);

    // The control loop makes blocking HTTPS calls, so it stays off the
    // async runtime.
    let control = std::thread::Builder::new()
        .name("control-loop".into())
        .spawn(move || runner.run(&mut transport))?;

    let http_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(http_addr, PortalState::new(client)).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });
    let control_handle = tokio::task::spawn_blocking(move || control.join());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        result = control_handle => {
            match result {
                Ok(Ok(Err(e))) => tracing::error!("Control loop failed: {:#}", e),
                Ok(Ok(Ok(()))) => tracing::warn!("Control loop stopped"),
                _ => tracing::error!("Control loop panicked"),
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
