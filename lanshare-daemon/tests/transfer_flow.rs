//! Two coordinators talking over loopback TCP.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use lanshare_core::{
    Announcement, Device, DeviceRegistry, Event, HistoryEntry, HistoryRecorder, Notifier, Transfer,
    TransferStatus,
};
use lanshare_daemon::{CoordinatorSettings, TransferCoordinator, TransferError};
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Default)]
struct Events(Mutex<Vec<Event>>);

impl Notifier for Events {
    fn publish(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl Events {
    fn updates(&self, id: &str) -> Vec<Transfer> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::TransferUpdate(t) if t.id == id => Some(t.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Yields one chunk, then fails like a disk that went away.
struct FailingSource {
    served: bool,
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.served {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk gone")));
        }
        self.served = true;
        buf.put_slice(b"xyz");
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct History(Mutex<Vec<(String, HistoryEntry)>>);

impl HistoryRecorder for History {
    fn record(&self, identity: &str, entry: &HistoryEntry) -> anyhow::Result<()> {
        self.0.lock().unwrap().push((identity.to_string(), entry.clone()));
        Ok(())
    }
}

struct Node {
    coord: Arc<TransferCoordinator>,
    events: Arc<Events>,
    history: Arc<History>,
    registry: Arc<DeviceRegistry>,
    port: u16,
    dir: tempfile::TempDir,
}

impl Node {
    async fn start(id: &str, identity: &str, chunk_size: usize, decision: Duration, response: Duration) -> Node {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Events::default());
        let history = Arc::new(History::default());
        let registry = Arc::new(DeviceRegistry::new());
        let coord = Arc::new(TransferCoordinator::new(
            CoordinatorSettings {
                device_id: id.to_string(),
                device_name: format!("{id}-host"),
                download_dir: dir.path().join("downloads"),
                chunk_size,
                decision_timeout: decision,
                response_timeout: response,
            },
            registry.clone(),
            Arc::new(identity.to_string()),
            events.clone(),
            history.clone(),
        ));
        let listener = TransferCoordinator::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(coord.clone().serve(listener));
        Node {
            coord,
            events,
            history,
            registry,
            port,
            dir,
        }
    }

    /// Make `other` known to this node at its loopback port.
    fn learn(&self, other_id: &str, other: &Node, identity: &str) {
        let ann = Announcement {
            id: other_id.to_string(),
            name: format!("{other_id}-host"),
            identity: identity.to_string(),
            ip: "127.0.0.1".into(),
            port: other.port,
        };
        self.registry
            .upsert(Device::from_announcement(ann, "127.0.0.1".into(), Utc::now()));
    }

    fn downloads(&self) -> std::path::PathBuf {
        self.dir.path().join("downloads")
    }

    async fn wait_pending(&self) -> String {
        for _ in 0..1000 {
            if let Some(p) = self.coord.pending().await.into_iter().next() {
                return p.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no pending request arrived");
    }

    async fn wait_terminal(&self, id: &str) -> Transfer {
        for _ in 0..1000 {
            if let Some(t) = self.coord.transfer(id).await.filter(|t| t.is_terminal()) {
                return t;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transfer {id} never finished");
    }
}

const LONG: Duration = Duration::from_secs(10);

async fn pair(decision: Duration, response: Duration, chunk_size: usize) -> (Node, Node) {
    let alice = Node::start("dev-a", "alice", chunk_size, LONG, response).await;
    let bob = Node::start("dev-b", "bob", chunk_size, decision, LONG).await;
    alice.learn("dev-b", &bob, "bob");
    (alice, bob)
}

#[tokio::test]
async fn accepted_transfer_lands_on_disk() {
    let (alice, bob) = pair(LONG, LONG, 64 * 1024).await;

    let sender = alice.coord.clone();
    let send = tokio::spawn(async move { sender.send_stream("dev-b", &b"abc"[..], "a.txt", 3).await });

    let id = bob.wait_pending().await;
    let pending = bob.coord.pending().await;
    assert_eq!(pending[0].sender_id, "dev-a");
    assert_eq!(pending[0].sender_name, "alice");
    bob.coord.accept(&id).await.unwrap();

    let sent = send.await.unwrap().unwrap();
    assert_eq!(sent.id, id);
    assert_eq!(sent.status, TransferStatus::Completed);
    assert_eq!(sent.peer_name, "bob");

    let got = bob.wait_terminal(&id).await;
    assert_eq!(got.status, TransferStatus::Completed);
    assert_eq!(got.transferred, 3);
    assert_eq!(got.progress, 100.0);
    assert!(got.end_time.is_some());
    assert_eq!(std::fs::read(bob.downloads().join("a.txt")).unwrap(), b"abc");

    let a_hist = alice.history.0.lock().unwrap().clone();
    let b_hist = bob.history.0.lock().unwrap().clone();
    assert_eq!(a_hist.len(), 1);
    assert_eq!(b_hist.len(), 1);
    assert_eq!(a_hist[0].1.id, b_hist[0].1.id);
    assert_eq!(a_hist[0].0, "alice");
    assert_eq!(b_hist[0].0, "bob");
    assert_eq!(b_hist[0].1.status, TransferStatus::Completed);
}

#[tokio::test]
async fn unanswered_request_fails_sender_and_saves_nothing() {
    let (alice, bob) = pair(LONG, Duration::from_millis(300), 64 * 1024).await;

    let err = alice
        .coord
        .send_stream("dev-b", &b"abc"[..], "a.txt", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::ResponseTimeout(_)), "{err}");

    let transfers = alice.coord.transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].status, TransferStatus::Failed);
    assert!(transfers[0].end_time.is_some());
    assert_eq!(alice.history.0.lock().unwrap()[0].1.status, TransferStatus::Failed);

    assert_eq!(bob.coord.pending().await.len(), 1);
    assert!(bob.coord.received_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn receiver_timeout_reads_as_rejection() {
    let (alice, bob) = pair(Duration::from_millis(100), LONG, 64 * 1024).await;

    let err = alice
        .coord
        .send_stream("dev-b", &b"abc"[..], "a.txt", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Rejected));
    assert_eq!(alice.coord.transfers().await[0].status, TransferStatus::Rejected);

    for _ in 0..200 {
        let rejected = bob.events.0.lock().unwrap().iter().any(|e| e.kind() == "transfer_rejected");
        if rejected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let kinds: Vec<&str> = bob.events.0.lock().unwrap().iter().map(Event::kind).collect();
    assert!(kinds.contains(&"transfer_rejected"), "{kinds:?}");
    assert!(bob.coord.transfers().await.is_empty());
}

#[tokio::test]
async fn explicit_reject_reaches_sender() {
    let (alice, bob) = pair(LONG, LONG, 64 * 1024).await;

    let sender = alice.coord.clone();
    let send = tokio::spawn(async move { sender.send_stream("dev-b", &b"abc"[..], "a.txt", 3).await });
    let id = bob.wait_pending().await;
    bob.coord.reject(&id).await.unwrap();

    assert!(matches!(send.await.unwrap(), Err(TransferError::Rejected)));
    let hist = alice.history.0.lock().unwrap().clone();
    assert_eq!(hist[0].1.status, TransferStatus::Rejected);
    assert!(bob.history.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let (alice, bob) = pair(LONG, LONG, 1024).await;
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let size = payload.len() as u64;

    let sender = alice.coord.clone();
    let data = payload.clone();
    let send = tokio::spawn(async move { sender.send_stream("dev-b", &data[..], "big.bin", size).await });
    let id = bob.wait_pending().await;
    bob.coord.accept(&id).await.unwrap();
    send.await.unwrap().unwrap();
    bob.wait_terminal(&id).await;

    for updates in [alice.events.updates(&id), bob.events.updates(&id)] {
        assert!(updates.len() >= 2);
        for w in updates.windows(2) {
            assert!(w[1].transferred >= w[0].transferred);
            assert!(w[1].progress >= w[0].progress);
        }
        let last = updates.last().unwrap();
        assert_eq!(last.status, TransferStatus::Completed);
        assert_eq!(last.progress, 100.0);
        assert_eq!(last.transferred, size);
    }
    assert_eq!(std::fs::read(bob.downloads().join("big.bin")).unwrap(), payload);
}

#[tokio::test]
async fn send_path_uses_file_name_and_never_overwrites() {
    let (alice, bob) = pair(LONG, LONG, 64 * 1024).await;
    let src_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().join("notes.txt");
    std::fs::write(&src, "hello").unwrap();

    for _ in 0..2 {
        let sender = alice.coord.clone();
        let path = src.clone();
        let send = tokio::spawn(async move { sender.send_path("dev-b", &path).await });
        let id = bob.wait_pending().await;
        bob.coord.accept(&id).await.unwrap();
        let sent = send.await.unwrap().unwrap();
        assert_eq!(sent.file_name, "notes.txt");
        assert_eq!(sent.file_size, 5);
        bob.wait_terminal(&id).await;
    }

    let files = bob.coord.received_files().await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.name == "notes.txt"));
    assert!(files.iter().any(|f| f.name.starts_with("notes_") && f.name.ends_with(".txt")));
    assert!(files.iter().all(|f| f.size == 5));
}

#[tokio::test]
async fn unknown_peer_and_missing_file() {
    let (alice, _bob) = pair(LONG, LONG, 64 * 1024).await;
    let err = alice
        .coord
        .send_path("nobody", std::path::Path::new("/does/not/exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PeerNotFound(_)));

    let err = alice
        .coord
        .send_path("dev-b", std::path::Path::new("/does/not/exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Io(_)));
    assert!(alice.coord.transfers().await.is_empty());
}

#[tokio::test]
async fn source_read_error_fails_the_send() {
    let (alice, bob) = pair(LONG, LONG, 64 * 1024).await;

    let sender = alice.coord.clone();
    let send = tokio::spawn(async move {
        sender
            .send_stream("dev-b", FailingSource { served: false }, "broken.bin", 10)
            .await
    });
    let id = bob.wait_pending().await;
    bob.coord.accept(&id).await.unwrap();

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::Stream(_)), "{err}");

    let t = alice.coord.transfer(&id).await.unwrap();
    assert_eq!(t.status, TransferStatus::Failed);
    assert_eq!(t.transferred, 3);
    assert!(t.end_time.is_some());
    assert_eq!(alice.events.updates(&id).last().unwrap().status, TransferStatus::Failed);

    let hist = alice.history.0.lock().unwrap().clone();
    assert_eq!(hist.len(), 1);
    assert_eq!(hist[0].1.id, id);
    assert_eq!(hist[0].1.status, TransferStatus::Failed);
}

#[tokio::test]
async fn uncreatable_destination_fails_the_receive() {
    let (alice, bob) = pair(LONG, LONG, 64 * 1024).await;
    // A regular file where the download directory should be.
    std::fs::write(bob.downloads(), "not a directory").unwrap();

    let sender = alice.coord.clone();
    let send = tokio::spawn(async move { sender.send_stream("dev-b", &b"abc"[..], "a.txt", 3).await });
    let id = bob.wait_pending().await;
    bob.coord.accept(&id).await.unwrap();
    // The sender may or may not notice before its bytes are buffered by the kernel.
    let _ = send.await.unwrap();

    let got = bob.wait_terminal(&id).await;
    assert_eq!(got.status, TransferStatus::Failed);
    assert!(got.end_time.is_some());
    assert_eq!(bob.events.updates(&id).last().unwrap().status, TransferStatus::Failed);

    let hist = bob.history.0.lock().unwrap().clone();
    assert_eq!(hist.len(), 1);
    assert_eq!(hist[0].0, "bob");
    assert_eq!(hist[0].1.status, TransferStatus::Failed);
    assert_eq!(std::fs::read_to_string(bob.downloads()).unwrap(), "not a directory");
}
