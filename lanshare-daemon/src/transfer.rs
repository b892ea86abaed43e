//! Transfer coordinator: TCP listener for incoming files, outbound sends, the pending-request
//! table and the transfer table.
//!
//! Each connection, inbound or outbound, is owned by one task. That task holds the working
//! copy of its `Transfer` and pushes snapshots into the shared table when it publishes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lanshare_core::wire::{encode_frame, FrameEncodeError};
use lanshare_core::{
    Direction, Event, HistoryRecorder, IdentityProvider, Notifier, PeerLookup, PendingTransfer,
    RateSampler, Transfer, TransferMetadata, TransferResponse,
};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::framed::{skip_delimiters, FrameError, FrameReader};

/// Attempts at finding a free save name before giving up.
const MAX_NAME_ATTEMPTS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("peer {0} not found")]
    PeerNotFound(String),
    #[error("no pending transfer {0}")]
    NotFound(String),
    #[error("dial {addr}: {source}")]
    Dial { addr: String, source: io::Error },
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error("reading response: {0}")]
    Response(#[source] FrameError),
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    #[error("transfer rejected by peer")]
    Rejected,
    #[error("stream failed: {0}")]
    Stream(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Sent as `senderId` in outgoing metadata.
    pub device_id: String,
    /// Fallback `senderName` while nobody is signed in.
    pub device_name: String,
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    pub decision_timeout: Duration,
    pub response_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &Config, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: cfg.device_name.clone(),
            download_dir: cfg.download_dir.clone(),
            chunk_size: cfg.chunk_size,
            decision_timeout: cfg.decision_timeout(),
            response_timeout: cfg.response_timeout(),
        }
    }
}

/// One entry of the download directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

struct PendingEntry {
    info: PendingTransfer,
    received: DateTime<Utc>,
    decision: mpsc::Sender<bool>,
}

pub struct TransferCoordinator {
    settings: CoordinatorSettings,
    peers: Arc<dyn PeerLookup>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    history: Arc<dyn HistoryRecorder>,
    pending: RwLock<HashMap<String, PendingEntry>>,
    transfers: RwLock<HashMap<String, Transfer>>,
}

impl TransferCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        peers: Arc<dyn PeerLookup>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn HistoryRecorder>,
    ) -> Self {
        Self {
            settings,
            peers,
            identity,
            notifier,
            history,
            pending: RwLock::new(HashMap::new()),
            transfers: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Bind the transfer listener on all interfaces.
    pub async fn bind(port: u16) -> io::Result<TcpListener> {
        TcpListener::bind(("0.0.0.0", port)).await
    }

    /// Accept loop: one task per incoming connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "transfer listener running");
        }
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "incoming connection");
                    let this = self.clone();
                    tokio::spawn(async move { this.handle_connection(stream).await });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Receive side of one connection: metadata, decision, response, payload.
    pub async fn handle_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut frames = FrameReader::new(rd);
        let meta: TransferMetadata = match frames.read_frame().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping connection: bad metadata frame");
                return;
            }
        };

        let (tx, mut rx) = mpsc::channel(1);
        let info = PendingTransfer::from(meta);
        {
            let mut pending = self.pending.write().await;
            if pending.contains_key(&info.id) {
                warn!(id = %info.id, "duplicate transfer request ignored");
                return;
            }
            pending.insert(
                info.id.clone(),
                PendingEntry {
                    info: info.clone(),
                    received: Utc::now(),
                    decision: tx,
                },
            );
        }
        debug!(id = %info.id, from = %info.sender_id, "waiting for decision");
        self.notifier.publish(&Event::IncomingRequest(info.clone()));

        let accept = match tokio::time::timeout(self.settings.decision_timeout, rx.recv()).await {
            Ok(Some(accept)) => accept,
            Ok(None) => false,
            Err(_) => {
                info!(id = %info.id, "no decision in time, rejecting");
                false
            }
        };
        self.pending.write().await.remove(&info.id);

        if let Err(e) = write_response(&mut wr, accept).await {
            warn!(id = %info.id, error = %e, "could not answer transfer request");
            return;
        }

        if !accept {
            info!(id = %info.id, "transfer rejected");
            self.notifier.publish(&Event::TransferRejected {
                id: info.id,
                file_name: info.file_name,
            });
            return;
        }

        let mut t = Transfer::new(
            info.id.clone(),
            info.file_name.clone(),
            info.file_size,
            Direction::Receive,
            info.sender_id.clone(),
            info.sender_name.clone(),
        );
        self.publish_update(&t).await;

        let mut payload = BufReader::with_capacity(self.settings.chunk_size.max(1), frames.into_payload());
        let result = async {
            skip_delimiters(&mut payload).await?;
            let (path, mut file) = create_destination(&self.settings.download_dir, &info.file_name).await?;
            debug!(id = %t.id, path = %path.display(), "saving");
            self.pump(&mut t, &mut payload, &mut file).await?;
            Ok::<_, io::Error>(path)
        }
        .await;

        match result {
            Ok(path) => {
                if t.file_size > 0 && t.transferred < t.file_size {
                    warn!(id = %t.id, got = t.transferred, want = t.file_size, "peer closed early");
                }
                t.complete();
                info!(id = %t.id, path = %path.display(), bytes = t.transferred, "transfer received");
            }
            Err(e) => {
                error!(id = %t.id, error = %e, "receive failed");
                t.fail();
            }
        }
        self.finish(&t).await;
    }

    /// Send `source` to `peer_id` as `file_name`. Returns the final transfer record.
    pub async fn send_stream<R>(
        &self,
        peer_id: &str,
        mut source: R,
        file_name: &str,
        file_size: u64,
    ) -> Result<Transfer, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let peer = self
            .peers
            .lookup(peer_id)
            .ok_or_else(|| TransferError::PeerNotFound(peer_id.to_string()))?;

        let mut sender_name = self.identity.current_identity();
        if sender_name.is_empty() {
            sender_name = self.settings.device_name.clone();
        }
        let meta = TransferMetadata::new(file_name, file_size, &self.settings.device_id, sender_name);
        let frame = encode_frame(&meta)?;

        let addr = peer.transfer_addr();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransferError::Dial {
                addr: addr.clone(),
                source,
            })?;
        stream.write_all(&frame).await?;
        debug!(id = %meta.id, %addr, "metadata sent");

        let mut t = Transfer::new(
            meta.id,
            meta.file_name,
            file_size,
            Direction::Send,
            peer.id.clone(),
            peer.display_name(),
        );
        self.publish_update(&t).await;

        let (rd, mut wr) = stream.into_split();
        let mut frames = FrameReader::new(rd);
        let timeout = self.settings.response_timeout;
        let resp: TransferResponse = match tokio::time::timeout(timeout, frames.read_frame()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                t.fail();
                self.finish(&t).await;
                return Err(TransferError::Response(e));
            }
            Err(_) => {
                t.fail();
                self.finish(&t).await;
                return Err(TransferError::ResponseTimeout(timeout));
            }
        };

        if !resp.accept {
            info!(id = %t.id, peer = %t.peer_name, "peer rejected transfer");
            t.reject();
            self.finish(&t).await;
            return Err(TransferError::Rejected);
        }

        t.start_streaming();
        self.publish_update(&t).await;
        let streamed = match self.pump(&mut t, &mut source, &mut wr).await {
            Ok(()) => wr.shutdown().await,
            Err(e) => Err(e),
        };
        if let Err(e) = streamed {
            error!(id = %t.id, error = %e, "send failed");
            t.fail();
            self.finish(&t).await;
            return Err(TransferError::Stream(e));
        }
        t.complete();
        info!(id = %t.id, peer = %t.peer_name, bytes = t.transferred, "transfer sent");
        self.finish(&t).await;
        Ok(t)
    }

    /// Send a local file. Name and size come from the path.
    pub async fn send_path(&self, peer_id: &str, path: &Path) -> Result<Transfer, TransferError> {
        if self.peers.lookup(peer_id).is_none() {
            return Err(TransferError::PeerNotFound(peer_id.to_string()));
        }
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.send_stream(peer_id, file, &name, size).await
    }

    pub async fn accept(&self, id: &str) -> Result<(), TransferError> {
        self.decide(id, true).await
    }

    pub async fn reject(&self, id: &str) -> Result<(), TransferError> {
        self.decide(id, false).await
    }

    async fn decide(&self, id: &str, accept: bool) -> Result<(), TransferError> {
        let pending = self.pending.read().await;
        let entry = pending
            .get(id)
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
        // Full or closed: a decision is already on its way, or the wait is over.
        let _ = entry.decision.try_send(accept);
        Ok(())
    }

    /// All transfers this process has seen, newest first.
    pub async fn transfers(&self) -> Vec<Transfer> {
        let mut out: Vec<Transfer> = self.transfers.read().await.values().cloned().collect();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        out
    }

    pub async fn transfer(&self, id: &str) -> Option<Transfer> {
        self.transfers.read().await.get(id).cloned()
    }

    /// Requests waiting for a decision, oldest first.
    pub async fn pending(&self) -> Vec<PendingTransfer> {
        let pending = self.pending.read().await;
        let mut entries: Vec<&PendingEntry> = pending.values().collect();
        entries.sort_by_key(|e| e.received);
        entries.into_iter().map(|e| e.info.clone()).collect()
    }

    /// Files in the download directory, newest first.
    pub async fn received_files(&self) -> io::Result<Vec<ReceivedFile>> {
        let mut dir = match tokio::fs::read_dir(&self.settings.download_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            out.push(ReceivedFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified,
            });
        }
        out.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    /// Copy `reader` into `writer` chunk by chunk, publishing telemetry at most once per interval.
    async fn pump<R, W>(&self, t: &mut Transfer, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.settings.chunk_size.max(1)];
        let mut sampler = RateSampler::new(Instant::now());
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            t.record_bytes(n);
            if let Some(elapsed) = sampler.due(Instant::now()) {
                t.sample_speed(elapsed);
                self.publish_update(t).await;
            }
        }
        writer.flush().await?;
        t.sample_speed(sampler.elapsed(Instant::now()));
        Ok(())
    }

    async fn publish_update(&self, t: &Transfer) {
        self.transfers.write().await.insert(t.id.clone(), t.clone());
        self.notifier.publish(&Event::TransferUpdate(t.clone()));
    }

    /// Terminal state: final update, then history.
    async fn finish(&self, t: &Transfer) {
        self.publish_update(t).await;
        let identity = self.identity.current_identity();
        let entry = t.history_entry();
        let history = self.history.clone();
        // Recorders do blocking file I/O.
        match tokio::task::spawn_blocking(move || history.record(&identity, &entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(id = %t.id, error = %e, "history record failed"),
            Err(e) => warn!(id = %t.id, error = %e, "history task failed"),
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, accept: bool) -> io::Result<()> {
    let frame = encode_frame(&TransferResponse { accept })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    w.write_all(&frame).await?;
    w.flush().await
}

/// Final path component of a peer-supplied name. Never escapes the download directory.
pub fn safe_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    match last {
        "" | "." | ".." => "unnamed".to_string(),
        s => s.to_string(),
    }
}

/// `stem_<tag>.ext`, or `name_<tag>` when there is no extension.
fn tagged_name(name: &str, tag: u64) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{}_{}.{}", stem.to_string_lossy(), tag, ext.to_string_lossy()),
        _ => format!("{name}_{tag}"),
    }
}

/// Open a fresh file for `name` in `dir`. An existing file is never overwritten: the name
/// gets a millisecond timestamp, bumped until free.
pub async fn create_destination(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    tokio::fs::create_dir_all(dir).await?;
    let name = safe_file_name(name);
    let mut candidate = dir.join(&name);
    let base = Utc::now().timestamp_millis().max(0) as u64;
    for attempt in 0..=MAX_NAME_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = dir.join(tagged_name(&name, base + attempt));
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {name}"),
    ))
}
