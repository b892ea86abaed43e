//! Transfer history kept as JSON lines, one record per (transfer id, identity).

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use lanshare_core::{HistoryEntry, HistoryRecorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    identity: String,
    #[serde(flatten)]
    entry: HistoryEntry,
}

/// Append-only history file. Lines that fail to parse are skipped on load.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    seen: Mutex<HashSet<(String, String)>>,
}

impl JsonlHistory {
    /// Open (or start) the history file at `path`, creating its directory.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let seen = read_all(&path)?
            .into_iter()
            .map(|s| (s.entry.id, s.identity))
            .collect::<HashSet<_>>();
        debug!(path = %path.display(), records = seen.len(), "history loaded");
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    /// Entries recorded for `identity`, newest first.
    pub fn entries(&self, identity: &str) -> anyhow::Result<Vec<HistoryEntry>> {
        let mut out: Vec<HistoryEntry> = read_all(&self.path)?
            .into_iter()
            .filter(|s| s.identity == identity)
            .map(|s| s.entry)
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }
}

impl HistoryRecorder for JsonlHistory {
    fn record(&self, identity: &str, entry: &HistoryEntry) -> anyhow::Result<()> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let key = (entry.id.clone(), identity.to_string());
        if seen.contains(&key) {
            return Ok(());
        }
        let mut line = serde_json::to_vec(&StoredEntry {
            identity: identity.to_string(),
            entry: entry.clone(),
        })?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line)?;
        seen.insert(key);
        Ok(())
    }
}

fn read_all(path: &Path) -> anyhow::Result<Vec<StoredEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
    };
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredEntry>(&line) {
            Ok(s) => out.push(s),
            Err(e) => warn!(error = %e, "skipping unreadable history line"),
        }
    }
    Ok(out)
}
