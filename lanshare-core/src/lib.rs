//! lanshare protocol core.
//! No I/O: the daemon owns sockets and files and drives these types.

pub mod device;
pub mod events;
pub mod protocol;
pub mod services;
pub mod transfer;
pub mod wire;

pub use device::{Device, DeviceRegistry, LIVENESS_WINDOW};
pub use events::Event;
pub use protocol::{Announcement, TransferMetadata, TransferResponse};
pub use services::{HistoryRecorder, IdentityProvider, Notifier, PeerLookup};
pub use transfer::{
    Direction, HistoryEntry, PendingTransfer, RateSampler, Transfer, TransferStatus,
};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
