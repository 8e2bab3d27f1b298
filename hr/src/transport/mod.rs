//! Transport adapters
//!
//! The broker needs two things from a transport: a way to hand one [`Message`] to
//! a peer (or to "everyone I can reach"), and a queue of inbound messages tagged
//! with the peer that sent them. Delivery is best effort; the protocol above
//! tolerates drops and duplicates.
//!
//! - [`memory`] - in-process hub over tokio channels, with fault injection
//! - [`unix`] - Unix Domain Socket hub, newline-delimited JSON

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::broker::Message;

mod config;
mod error;
pub mod framing;
pub mod memory;
pub mod unix;

pub use config::TransportConfig;
pub use error::TransportError;
pub use memory::{FaultConfig, MemoryNetwork, MemoryTransport};
pub use unix::{UnixHub, UnixPeer};

/// Opaque handle naming one process on the channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a newly connected peer
    pub fn generate() -> Self {
        Self(format!("peer-{}", uuid::Uuid::now_v7()))
    }

    /// The id every peer uses for its hub
    pub fn coordinator() -> Self {
        Self("coordinator".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as received, with the peer it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message: Message,
    pub from: PeerId,
}

/// Contract every concrete transport satisfies
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `message` to `target`. With no target, a coordinator delivers to
    /// every known peer and a peer delivers to its coordinator.
    async fn send(&self, target: Option<&PeerId>, message: &Message) -> Result<(), TransportError>;

    /// Currently reachable peers; membership may change between calls
    fn peers(&self) -> Vec<PeerId>;
}

/// Get the default socket path for the hub
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("hubrpc")
        .join("hub.sock")
}
