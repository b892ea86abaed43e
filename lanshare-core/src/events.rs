//! Events published by the transfer coordinator.

use serde::Serialize;

use crate::transfer::{PendingTransfer, Transfer};

/// Serialized as `{"type": "...", "payload": {...}}`, the shape UI subscribers consume.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// A peer wants to send a file; the operator must accept or reject it.
    IncomingRequest(PendingTransfer),
    /// Snapshot of a transfer after a state change or a telemetry sample.
    TransferUpdate(Transfer),
    /// An incoming request was rejected or timed out.
    #[serde(rename_all = "camelCase")]
    TransferRejected { id: String, file_name: String },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::IncomingRequest(_) => "incoming_request",
            Event::TransferUpdate(_) => "transfer_update",
            Event::TransferRejected { .. } => "transfer_rejected",
        }
    }

    /// Transfer id this event concerns.
    pub fn transfer_id(&self) -> &str {
        match self {
            Event::IncomingRequest(p) => &p.id,
            Event::TransferUpdate(t) => &t.id,
            Event::TransferRejected { id, .. } => id,
        }
    }
}
