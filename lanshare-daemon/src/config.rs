//! Load config from file, environment and command line.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration. File: ~/.config/lanshare/config.toml or /etc/lanshare/config.toml.
/// Env overrides: LANSHARE_TRANSFER_PORT, LANSHARE_DISCOVERY_PORT, LANSHARE_DEVICE_NAME,
/// LANSHARE_DOWNLOAD_DIR, LANSHARE_IDENTITY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transfer TCP listen port (default 9000).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// Discovery UDP port, shared by every device on the LAN (default 9001).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Host label advertised to peers (default: hostname).
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Where received files land.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Where the transfer history file lives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_broadcast_interval_secs")]
    pub broadcast_interval_secs: u64,
    /// How long an incoming request waits for the operator.
    #[serde(default = "default_timeout_secs")]
    pub decision_timeout_secs: u64,
    /// How long a sender waits for the receiver's answer.
    #[serde(default = "default_timeout_secs")]
    pub response_timeout_secs: u64,
    /// Identity to sign in with at startup. Without one the device stays undiscoverable.
    #[serde(default)]
    pub identity: Option<String>,
}

fn default_transfer_port() -> u16 {
    9000
}
fn default_discovery_port() -> u16 {
    9001
}
fn default_device_name() -> String {
    hostname::get().map_or_else(
        |_| "unknown".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_chunk_size() -> usize {
    lanshare_core::transfer::DEFAULT_CHUNK_SIZE
}
fn default_broadcast_interval_secs() -> u64 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer_port: default_transfer_port(),
            discovery_port: default_discovery_port(),
            device_name: default_device_name(),
            download_dir: default_download_dir(),
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            broadcast_interval_secs: default_broadcast_interval_secs(),
            decision_timeout_secs: default_timeout_secs(),
            response_timeout_secs: default_timeout_secs(),
            identity: None,
        }
    }
}

impl Config {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.jsonl")
    }

    /// Apply LANSHARE_* environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = lookup("LANSHARE_TRANSFER_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.transfer_port = p;
        }
        if let Some(p) = lookup("LANSHARE_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.discovery_port = p;
        }
        if let Some(name) = lookup("LANSHARE_DEVICE_NAME").filter(|s| !s.is_empty()) {
            self.device_name = name;
        }
        if let Some(dir) = lookup("LANSHARE_DOWNLOAD_DIR").filter(|s| !s.is_empty()) {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(id) = lookup("LANSHARE_IDENTITY").filter(|s| !s.is_empty()) {
            self.identity = Some(id);
        }
    }
}

/// Load config: merge default, then config file (explicit path or first one found), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_file().unwrap_or_default(),
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    use anyhow::Context;
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanshare/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(error = %e, "ignoring config file"),
            }
            break;
        }
    }
    None
}
