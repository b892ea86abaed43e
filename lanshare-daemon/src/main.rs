// lanshare: share files with devices on the same LAN.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lanshare_core::{DeviceRegistry, Notifier};
use lanshare_daemon::console::{self, Console, Flow};
use lanshare_daemon::history::JsonlHistory;
use lanshare_daemon::identity::SessionIdentity;
use lanshare_daemon::notify::{BroadcastNotifier, FanOut, LogNotifier};
use lanshare_daemon::{config, net};
use lanshare_daemon::{CoordinatorSettings, DiscoveryService, DiscoverySettings, TransferCoordinator};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lanshare", version, about = "Peer-to-peer file sharing on the local network")]
struct Cli {
    /// Config file (default: ~/.config/lanshare/config.toml, then /etc/lanshare/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// TCP port for incoming transfers
    #[arg(long)]
    transfer_port: Option<u16>,
    /// Name advertised to other devices
    #[arg(long)]
    name: Option<String>,
    /// Directory for received files
    #[arg(long)]
    downloads: Option<PathBuf>,
    /// Sign in with this identity at startup
    #[arg(long)]
    identity: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.transfer_port {
        cfg.transfer_port = port;
    }
    if let Some(name) = cli.name {
        cfg.device_name = name;
    }
    if let Some(dir) = cli.downloads {
        cfg.download_dir = dir;
    }
    if cli.identity.is_some() {
        cfg.identity = cli.identity;
    }

    let local_ip = net::local_ip();
    let device_id = Uuid::new_v4().to_string();
    info!(id = %device_id, name = %cfg.device_name, ip = %local_ip, "starting lanshare");

    let registry = Arc::new(DeviceRegistry::new());
    let identity = Arc::new(SessionIdentity::new(cfg.identity.clone()));
    let history = Arc::new(
        JsonlHistory::open(cfg.history_path()).context("opening transfer history")?,
    );
    let events = Arc::new(BroadcastNotifier::new(256));
    let sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier), events.clone()];
    let notifier = Arc::new(FanOut(sinks));

    let discovery = Arc::new(DiscoveryService::new(
        DiscoverySettings {
            device_id: device_id.clone(),
            device_name: cfg.device_name.clone(),
            local_ip,
            transfer_port: cfg.transfer_port,
            discovery_port: cfg.discovery_port,
            broadcast_interval: cfg.broadcast_interval(),
        },
        registry.clone(),
        identity.clone(),
    ));
    let coordinator = Arc::new(TransferCoordinator::new(
        CoordinatorSettings::from_config(&cfg, device_id),
        registry,
        identity.clone(),
        notifier,
        history.clone(),
    ));

    let udp = discovery
        .bind()
        .with_context(|| format!("binding discovery port {}", cfg.discovery_port))?;
    let listener = TransferCoordinator::bind(cfg.transfer_port)
        .await
        .with_context(|| format!("binding transfer port {}", cfg.transfer_port))?;

    tokio::spawn(discovery.clone().serve(udp));
    tokio::spawn(coordinator.clone().serve(listener));
    tokio::spawn(console::print_events(events.subscribe()));

    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(console::read_commands(cmd_tx));
    let console = Console {
        discovery,
        coordinator,
        identity,
        history,
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    // Without stdin (service mode) the daemon runs until signalled.
    let mut stdin_open = true;
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            cmd = cmd_rx.recv(), if stdin_open => match cmd {
                Some(cmd) => {
                    if console.dispatch(cmd).await == Flow::Quit {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }
    info!("shutting down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
