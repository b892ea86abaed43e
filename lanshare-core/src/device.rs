//! Device registry: peers heard on the discovery channel, filtered by liveness at read time.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Announcement;
use crate::services::PeerLookup;

/// A device is listed only if it announced itself within this window.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

/// A discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub identity: String,
    pub ip: String,
    /// Transfer listener port.
    pub port: u16,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Build a record from an announcement; `ip` is the address the datagram came from.
    pub fn from_announcement(ann: Announcement, ip: String, seen: DateTime<Utc>) -> Self {
        Self {
            id: ann.id,
            name: ann.name,
            identity: ann.identity,
            ip,
            port: ann.port,
            last_seen: seen,
        }
    }

    /// `ip:port` of the peer's transfer listener.
    pub fn transfer_addr(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    /// Label shown for this peer: the signed-in identity, or the host name when empty.
    pub fn display_name(&self) -> &str {
        if self.identity.is_empty() {
            &self.name
        } else {
            &self.identity
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(age) => age < window,
            // last_seen ahead of `now` (clock skew between callers): still live.
            Err(_) => true,
        }
    }
}

/// Thread-safe table of devices keyed by id. Records are overwritten, never removed.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a device.
    pub fn upsert(&self, device: Device) {
        let mut map = self.devices.write().unwrap_or_else(|e| e.into_inner());
        map.insert(device.id.clone(), device);
    }

    /// Look up a device regardless of liveness.
    pub fn get(&self, id: &str) -> Option<Device> {
        let map = self.devices.read().unwrap_or_else(|e| e.into_inner());
        map.get(id).cloned()
    }

    /// Devices seen within `window` of `now`, sorted by name for stable listings.
    pub fn list_live(&self, now: DateTime<Utc>, window: Duration) -> Vec<Device> {
        let mut live: Vec<Device> = {
            let map = self.devices.read().unwrap_or_else(|e| e.into_inner());
            map.values()
                .filter(|d| d.is_live(now, window))
                .cloned()
                .collect()
        };
        live.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        live
    }
}

impl PeerLookup for DeviceRegistry {
    fn lookup(&self, id: &str) -> Option<Device> {
        self.get(id)
    }
}
