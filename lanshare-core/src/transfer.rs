//! Transfer model: status machine, progress/speed telemetry, pending requests, history records.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::TransferMetadata;

/// Default streaming chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Minimum spacing between speed samples / telemetry updates.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    WaitingAcceptance,
    Sending,
    Receiving,
    Completed,
    Failed,
    Rejected,
}

impl TransferStatus {
    /// Terminal states: history is recorded and the transfer no longer changes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::WaitingAcceptance => "waiting_acceptance",
            TransferStatus::Sending => "sending",
            TransferStatus::Receiving => "receiving",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incoming request waiting for the operator. The decision channel lives with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransfer {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub sender_id: String,
    pub sender_name: String,
}

impl From<TransferMetadata> for PendingTransfer {
    fn from(m: TransferMetadata) -> Self {
        Self {
            id: m.id,
            file_name: m.file_name,
            file_size: m.file_size,
            sender_id: m.sender_id,
            sender_name: m.sender_name,
        }
    }
}

/// One file movement, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub transferred: u64,
    /// Percent, 0..=100.
    pub progress: f64,
    /// MB/s averaged since streaming started.
    pub speed: f64,
    pub status: TransferStatus,
    pub direction: Direction,
    pub peer_id: String,
    pub peer_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        direction: Direction,
        peer_id: impl Into<String>,
        peer_name: impl Into<String>,
    ) -> Self {
        let status = match direction {
            Direction::Send => TransferStatus::WaitingAcceptance,
            Direction::Receive => TransferStatus::Receiving,
        };
        Self {
            id: id.into(),
            file_name: file_name.into(),
            file_size,
            transferred: 0,
            progress: 0.0,
            speed: 0.0,
            status,
            direction,
            peer_id: peer_id.into(),
            peer_name: peer_name.into(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Account for `n` more bytes moved. Progress never decreases and is capped at 100.
    pub fn record_bytes(&mut self, n: usize) {
        self.transferred = self.transferred.saturating_add(n as u64);
        if self.file_size > 0 {
            let pct = self.transferred as f64 / self.file_size as f64 * 100.0;
            self.progress = pct.min(100.0).max(self.progress);
        }
    }

    /// Recompute speed from bytes moved over `elapsed`.
    pub fn sample_speed(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.speed = self.transferred as f64 / BYTES_PER_MB / secs;
        }
    }

    pub fn start_streaming(&mut self) {
        self.status = match self.direction {
            Direction::Send => TransferStatus::Sending,
            Direction::Receive => TransferStatus::Receiving,
        };
    }

    pub fn complete(&mut self) {
        self.status = TransferStatus::Completed;
        self.progress = 100.0;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = TransferStatus::Failed;
        self.end_time = Some(Utc::now());
    }

    pub fn reject(&mut self) {
        self.status = TransferStatus::Rejected;
        self.end_time = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// History record for the current state, stamped now.
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            direction: self.direction,
            peer_name: self.peer_name.clone(),
            status: self.status,
            timestamp: Utc::now(),
        }
    }
}

/// Durable record of a finished transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub direction: Direction,
    pub peer_name: String,
    pub status: TransferStatus,
    pub timestamp: DateTime<Utc>,
}

/// Rate limiter for telemetry: answers "is a sample due" at most once per interval.
#[derive(Debug, Clone)]
pub struct RateSampler {
    started: Instant,
    last: Instant,
    interval: Duration,
}

impl RateSampler {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, SAMPLE_INTERVAL)
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            started: now,
            last: now,
            interval,
        }
    }

    /// If more than `interval` passed since the last sample, returns the time since start and rearms.
    pub fn due(&mut self, now: Instant) -> Option<Duration> {
        if now.saturating_duration_since(self.last) > self.interval {
            self.last = now;
            Some(now.saturating_duration_since(self.started))
        } else {
            None
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}
