//! Local address discovery.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// IPv4 address of the interface that routes off-host. Connecting a UDP socket sends nothing;
/// it only asks the kernel which source address it would use.
pub fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

/// Best-effort local address, loopback when the host has no route.
pub fn local_ip() -> IpAddr {
    outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
