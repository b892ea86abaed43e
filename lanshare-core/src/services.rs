//! Collaborators the daemon is built from. Each is injected at construction;
//! nothing in the core reaches for global state.

use crate::device::Device;
use crate::events::Event;
use crate::transfer::HistoryEntry;

/// Source of the signed-in account label. Empty string means nobody is signed in.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> String;
}

/// Fire-and-forget fan-out of coordinator events. Implementations must not block
/// and must swallow delivery failures to individual subscribers.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Durable transfer history. Must be idempotent on `(entry.id, identity)`.
pub trait HistoryRecorder: Send + Sync {
    fn record(&self, identity: &str, entry: &HistoryEntry) -> anyhow::Result<()>;
}

/// Resolve a peer id to its current address.
pub trait PeerLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Device>;
}

/// Fixed identity, handy for tests and headless setups.
impl IdentityProvider for String {
    fn current_identity(&self) -> String {
        self.clone()
    }
}

/// Notifier that drops everything.
impl Notifier for () {
    fn publish(&self, _event: &Event) {}
}
