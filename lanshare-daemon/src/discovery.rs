//! LAN discovery: UDP multicast announcements in, registry updates out.
//!
//! Two loops share one socket. The advertiser announces this device every
//! `broadcast_interval` while someone is signed in; the listener feeds every
//! other device's announcements into the registry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lanshare_core::protocol::{MAX_DATAGRAM_SIZE, MULTICAST_GROUP};
use lanshare_core::{Announcement, Device, DeviceRegistry, IdentityProvider, LIVENESS_WINDOW};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// What this device announces about itself.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub device_id: String,
    pub device_name: String,
    pub local_ip: IpAddr,
    /// Transfer listener port advertised to peers.
    pub transfer_port: u16,
    pub discovery_port: u16,
    pub broadcast_interval: Duration,
}

pub struct DiscoveryService {
    settings: DiscoverySettings,
    registry: Arc<DeviceRegistry>,
    identity: Arc<dyn IdentityProvider>,
}

impl DiscoveryService {
    pub fn new(
        settings: DiscoverySettings,
        registry: Arc<DeviceRegistry>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            settings,
            registry,
            identity,
        }
    }

    /// Devices heard from within the liveness window.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.list_live(Utc::now(), LIVENESS_WINDOW)
    }

    /// Any known device, live or not.
    pub fn device(&self, id: &str) -> Option<Device> {
        self.registry.get(id)
    }

    /// Multicast destination for announcements.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(multicast_group()), self.settings.discovery_port)
    }

    /// Bind the discovery port and join the group. Failure here means discovery cannot run.
    pub fn bind(&self) -> std::io::Result<UdpSocket> {
        make_multicast_socket(self.settings.discovery_port)
    }

    /// Run advertiser and listener on `socket` until the task is dropped.
    pub async fn serve(self: Arc<Self>, socket: UdpSocket) {
        let dest = self.group_addr();
        self.serve_to(Arc::new(socket), dest).await
    }

    /// Like `serve`, announcing to an arbitrary destination.
    pub async fn serve_to(self: Arc<Self>, socket: Arc<UdpSocket>, dest: SocketAddr) {
        info!(
            id = %self.settings.device_id,
            port = self.settings.discovery_port,
            "discovery running"
        );
        let adv = {
            let this = self.clone();
            let socket = socket.clone();
            tokio::spawn(async move { this.advertise_loop(socket, dest).await })
        };
        let listen = tokio::spawn(async move { self.listen_loop(socket).await });
        let _ = tokio::join!(adv, listen);
    }

    /// This device's announcement, or `None` while nobody is signed in.
    pub fn announcement(&self) -> Option<Announcement> {
        let identity = self.identity.current_identity();
        if identity.is_empty() {
            return None;
        }
        Some(Announcement {
            id: self.settings.device_id.clone(),
            name: self.settings.device_name.clone(),
            identity,
            ip: self.settings.local_ip.to_string(),
            port: self.settings.transfer_port,
        })
    }

    /// Send one announcement if signed in. Returns whether a datagram went out.
    pub async fn advertise_once(&self, socket: &UdpSocket, dest: SocketAddr) -> std::io::Result<bool> {
        let Some(ann) = self.announcement() else {
            return Ok(false);
        };
        let datagram = ann
            .to_datagram()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        socket.send_to(&datagram, dest).await?;
        Ok(true)
    }

    async fn advertise_loop(&self, socket: Arc<UdpSocket>, dest: SocketAddr) {
        let mut tick = tokio::time::interval(self.settings.broadcast_interval);
        loop {
            tick.tick().await;
            if let Err(e) = self.advertise_once(&socket, dest).await {
                warn!(error = %e, "announcement send failed");
            }
        }
    }

    async fn listen_loop(&self, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    self.ingest(&buf[..n], from);
                }
                Err(e) => {
                    warn!(error = %e, "discovery read failed");
                }
            }
        }
    }

    /// Handle one datagram. Malformed and self-originated announcements are dropped.
    pub fn ingest(&self, bytes: &[u8], from: SocketAddr) -> Option<Device> {
        let ann = Announcement::from_datagram(bytes)?;
        if ann.id == self.settings.device_id {
            return None;
        }
        let ip = if from.ip().is_unspecified() && !ann.ip.is_empty() {
            ann.ip.clone()
        } else {
            from.ip().to_string()
        };
        let device = Device::from_announcement(ann, ip, Utc::now());
        debug!(
            id = %device.id,
            name = %device.name,
            identity = %device.identity,
            from = %from,
            "peer announcement"
        );
        self.registry.upsert(device.clone());
        Some(device)
    }
}

fn multicast_group() -> Ipv4Addr {
    MULTICAST_GROUP.parse().unwrap_or(Ipv4Addr::new(239, 0, 0, 1))
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&multicast_group(), &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}
