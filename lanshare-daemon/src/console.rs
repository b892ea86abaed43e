//! Operator console: line commands from stdin, events printed as they arrive.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use lanshare_core::{Event, IdentityProvider, TransferStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::discovery::DiscoveryService;
use crate::history::JsonlHistory;
use crate::identity::SessionIdentity;
use crate::transfer::TransferCoordinator;

const HELP: &str = "commands: devices | send <peer-id> <path> | accept <id> | reject <id> | \
transfers | pending | files | history | signin <label> | signout | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Devices,
    Send { peer: String, path: PathBuf },
    Accept(String),
    Reject(String),
    Transfers,
    Pending,
    Files,
    History,
    SignIn(String),
    SignOut,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let cmd = match (word.to_ascii_lowercase().as_str(), rest) {
            ("devices", "") => Command::Devices,
            ("send", args) => {
                let (peer, path) = args
                    .split_once(char::is_whitespace)
                    .ok_or("usage: send <peer-id> <path>")?;
                let path = path.trim();
                if path.is_empty() {
                    return Err("usage: send <peer-id> <path>".into());
                }
                Command::Send {
                    peer: peer.to_string(),
                    path: PathBuf::from(path),
                }
            }
            ("accept", id) if !id.is_empty() => Command::Accept(id.to_string()),
            ("reject", id) if !id.is_empty() => Command::Reject(id.to_string()),
            ("transfers", "") => Command::Transfers,
            ("pending", "") => Command::Pending,
            ("files", "") => Command::Files,
            ("history", "") => Command::History,
            ("signin", label) if !label.is_empty() => Command::SignIn(label.to_string()),
            ("signout", "") => Command::SignOut,
            ("help", _) | ("?", _) => Command::Help,
            ("quit", _) | ("exit", _) => Command::Quit,
            _ => return Err(format!("unknown command: {line}")),
        };
        Ok(Some(cmd))
    }
}

/// Forward parsed stdin lines to `tx`. Parse errors are echoed and skipped.
pub async fn read_commands(tx: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Command::parse(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(msg) => println!("{msg}\n{HELP}"),
            },
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                return;
            }
        }
    }
}

/// Print every event until the channel closes.
pub async fn print_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(ev) => println!("{}", format_event(&ev)),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "console fell behind"),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

pub fn format_event(ev: &Event) -> String {
    match ev {
        Event::IncomingRequest(p) => format!(
            "{} wants to send {} ({} bytes). accept {} / reject {}",
            p.sender_name, p.file_name, p.file_size, p.id, p.id
        ),
        Event::TransferUpdate(t) if t.status == TransferStatus::Completed => {
            format!("[{}] {} completed ({} bytes)", t.id, t.file_name, t.transferred)
        }
        Event::TransferUpdate(t) => format!(
            "[{}] {} {} {:.0}% {:.2} MB/s",
            t.id, t.file_name, t.status, t.progress, t.speed
        ),
        Event::TransferRejected { id, file_name } => format!("[{id}] {file_name} rejected"),
    }
}

/// What the caller should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    pub discovery: Arc<DiscoveryService>,
    pub coordinator: Arc<TransferCoordinator>,
    pub identity: Arc<SessionIdentity>,
    pub history: Arc<JsonlHistory>,
}

impl Console {
    /// Run one command, printing its output.
    pub async fn dispatch(&self, cmd: Command) -> Flow {
        if cmd == Command::Quit {
            return Flow::Quit;
        }
        let out = self.execute(cmd).await;
        if !out.is_empty() {
            println!("{out}");
        }
        Flow::Continue
    }

    /// Run one command and return its output text. Sends are started in the background.
    pub async fn execute(&self, cmd: Command) -> String {
        let mut out = String::new();
        match cmd {
            Command::Devices => {
                let devices = self.discovery.devices();
                if devices.is_empty() {
                    out.push_str("no devices");
                }
                for d in devices {
                    let _ = writeln!(out, "{}  {} ({})  {}", d.id, d.display_name(), d.name, d.transfer_addr());
                }
            }
            Command::Send { peer, path } => {
                let coord = self.coordinator.clone();
                let _ = write!(out, "sending {} to {}", path.display(), peer);
                tokio::spawn(async move {
                    match coord.send_path(&peer, &path).await {
                        Ok(t) => info!(id = %t.id, peer = %peer, "send finished"),
                        Err(e) => println!("send {} failed: {e}", path.display()),
                    }
                });
            }
            Command::Accept(id) => match self.coordinator.accept(&id).await {
                Ok(()) => out.push_str("accepted"),
                Err(e) => out.push_str(&e.to_string()),
            },
            Command::Reject(id) => match self.coordinator.reject(&id).await {
                Ok(()) => out.push_str("rejected"),
                Err(e) => out.push_str(&e.to_string()),
            },
            Command::Transfers => {
                for t in self.coordinator.transfers().await {
                    let _ = writeln!(
                        out,
                        "{}  {:?} {}  {}  {}/{} bytes  {}",
                        t.id, t.direction, t.peer_name, t.file_name, t.transferred, t.file_size, t.status
                    );
                }
            }
            Command::Pending => {
                for p in self.coordinator.pending().await {
                    let _ = writeln!(out, "{}  {} ({} bytes) from {}", p.id, p.file_name, p.file_size, p.sender_name);
                }
            }
            Command::Files => match self.coordinator.received_files().await {
                Ok(files) => {
                    for f in files {
                        let _ = writeln!(out, "{}  {} bytes  {}", f.name, f.size, f.modified.to_rfc3339());
                    }
                }
                Err(e) => out.push_str(&format!("listing downloads: {e}")),
            },
            Command::History => {
                let identity = self.identity.current_identity();
                if identity.is_empty() {
                    out.push_str("not signed in");
                } else {
                    let history = self.history.clone();
                    match tokio::task::spawn_blocking(move || history.entries(&identity)).await {
                        Ok(Ok(entries)) => {
                            for h in entries {
                                let _ = writeln!(
                                    out,
                                    "{}  {:?} {}  {}  {}",
                                    h.timestamp.to_rfc3339(), h.direction, h.peer_name, h.file_name, h.status
                                );
                            }
                        }
                        Ok(Err(e)) => out.push_str(&format!("reading history: {e:#}")),
                        Err(e) => out.push_str(&format!("reading history: {e}")),
                    }
                }
            }
            Command::SignIn(label) => {
                self.identity.sign_in(&label);
                let _ = write!(out, "signed in as {}", self.identity.current_identity());
            }
            Command::SignOut => {
                self.identity.sign_out();
                out.push_str("signed out; no longer discoverable");
            }
            Command::Help => out.push_str(HELP),
            Command::Quit => {}
        }
        out.trim_end().to_string()
    }
}
