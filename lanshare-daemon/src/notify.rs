//! Notifier implementations: tracing log line and an in-process broadcast channel.

use lanshare_core::{Event, Notifier};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Logs every event. Updates go to debug so a large transfer does not flood the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, event: &Event) {
        match event {
            Event::IncomingRequest(p) => info!(
                id = %p.id,
                file = %p.file_name,
                size = p.file_size,
                from = %p.sender_name,
                "incoming transfer request"
            ),
            Event::TransferUpdate(t) if t.is_terminal() => info!(
                id = %t.id,
                file = %t.file_name,
                status = %t.status,
                transferred = t.transferred,
                "transfer finished"
            ),
            Event::TransferUpdate(t) => debug!(
                id = %t.id,
                status = %t.status,
                progress = t.progress,
                speed_mbps = t.speed,
                "transfer update"
            ),
            Event::TransferRejected { id, file_name } => {
                info!(id = %id, file = %file_name, "transfer rejected")
            }
        }
    }
}

/// Fans events out to any number of subscribers. Sending with no subscribers, or to a
/// subscriber that lags behind, never affects the publisher.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Event>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }
}

/// Publishes to several notifiers in order.
pub struct FanOut(pub Vec<std::sync::Arc<dyn Notifier>>);

impl Notifier for FanOut {
    fn publish(&self, event: &Event) {
        for n in &self.0 {
            n.publish(event);
        }
    }
}
