//! Process roles
//!
//! A role is picked once when the broker starts. It decides where a message that
//! arrived here but was not consumed here should go next.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::messages::Message;
use crate::transport::PeerId;

/// Which side of the hub a process sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// The single hub relaying between peers
    Coordinator,
    /// Any process that only talks to the hub
    Peer,
}

impl ProcessKind {
    /// Routing strategy for this kind of process
    pub fn role(self) -> Box<dyn Role> {
        match self {
            ProcessKind::Coordinator => Box::new(CoordinatorRole),
            ProcessKind::Peer => Box::new(PeerRole),
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Coordinator => write!(f, "coordinator"),
            ProcessKind::Peer => write!(f, "peer"),
        }
    }
}

/// Routing strategy
pub trait Role: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProcessKind;

    /// Peers that should receive `message`, which arrived from `origin` and was
    /// not consumed locally. `peers` is the transport's current membership.
    fn route(&self, message: &Message, origin: &PeerId, peers: &[PeerId]) -> Vec<PeerId>;

    fn is_coordinator(&self) -> bool {
        self.kind() == ProcessKind::Coordinator
    }
}

/// Fans every unconsumed message out to all peers except its origin
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorRole;

impl Role for CoordinatorRole {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Coordinator
    }

    fn route(&self, _message: &Message, origin: &PeerId, peers: &[PeerId]) -> Vec<PeerId> {
        peers.iter().filter(|peer| *peer != origin).cloned().collect()
    }
}

/// Peers never forward anything
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerRole;

impl Role for PeerRole {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Peer
    }

    fn route(&self, _message: &Message, _origin: &PeerId, _peers: &[PeerId]) -> Vec<PeerId> {
        Vec::new()
    }
}
