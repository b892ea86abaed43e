//! lanshare daemon: multicast discovery, TCP transfer coordinator, operator console.

pub mod config;
pub mod console;
pub mod discovery;
pub mod framed;
pub mod history;
pub mod identity;
pub mod net;
pub mod notify;
pub mod transfer;

pub use discovery::{DiscoveryService, DiscoverySettings};
pub use transfer::{CoordinatorSettings, ReceivedFile, TransferCoordinator, TransferError};
