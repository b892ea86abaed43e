//! lanshare wire messages. Encoding is JSON; framing is newline-delimited (see wire module).

use serde::{Deserialize, Serialize};

/// Multicast group every device announces itself on.
pub const MULTICAST_GROUP: &str = "239.0.0.1";

/// Largest discovery datagram accepted or sent.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Discovery: advertise presence. Sent as one UDP datagram, no frame delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub name: String,
    /// Account label of the signed-in operator. Never empty on the wire: unsigned devices stay silent.
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub ip: String,
    pub port: u16,
}

/// First frame on a transfer connection, sent by the sender before any file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub sender_id: String,
    pub sender_name: String,
}

/// Receiver's answer to a metadata frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub accept: bool,
}

impl Announcement {
    pub fn to_datagram(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse one datagram. Records without an id are rejected.
    pub fn from_datagram(bytes: &[u8]) -> Option<Self> {
        let ann: Announcement = serde_json::from_slice(bytes).ok()?;
        if ann.id.is_empty() {
            return None;
        }
        Some(ann)
    }
}

impl TransferMetadata {
    /// Metadata for a new outgoing transfer under a fresh random id.
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            file_size,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
        }
    }
}
