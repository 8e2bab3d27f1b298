//! In-process hub transport
//!
//! Connects one coordinator endpoint and any number of peer endpoints through
//! tokio channels. Peers can only reach the coordinator, mirroring the real
//! topology. Fault injection can drop or duplicate deliveries to exercise the
//! protocol's retry and dedup paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::{Inbound, PeerId, Transport, TransportError};
use crate::broker::Message;

/// Default inbound queue size per endpoint
const DEFAULT_CAPACITY: usize = 1024;

/// Per-delivery fault probabilities
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability that a delivery silently vanishes
    pub drop_rate: f64,
    /// Probability that a delivery arrives twice
    pub duplicate_rate: f64,
}

impl FaultConfig {
    pub fn duplicate_all() -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate: 1.0,
        }
    }
}

struct NetworkState {
    endpoints: HashMap<PeerId, mpsc::Sender<Inbound>>,
    faults: FaultConfig,
    capacity: usize,
}

/// Shared in-process network
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a network whose endpoints buffer up to `capacity` inbound messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                endpoints: HashMap::new(),
                faults: FaultConfig::default(),
                capacity,
            })),
        }
    }

    /// Apply fault probabilities to every delivery from now on
    pub fn set_faults(&self, faults: FaultConfig) {
        debug!(?faults, "MemoryNetwork::set_faults: called");
        lock(&self.state).faults = faults;
    }

    /// Attach the coordinator endpoint
    pub fn coordinator(&self) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        self.attach(PeerId::coordinator(), true)
    }

    /// Attach a peer endpoint
    pub fn peer(&self, name: impl Into<String>) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        self.attach(PeerId::new(name), false)
    }

    /// Detach an endpoint; later sends to it fail
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        debug!(%peer, "MemoryNetwork::disconnect: called");
        lock(&self.state).endpoints.remove(peer).is_some()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        lock(&self.state).endpoints.contains_key(peer)
    }

    fn attach(&self, id: PeerId, is_hub: bool) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        let mut state = lock(&self.state);
        let (tx, rx) = mpsc::channel(state.capacity);
        debug!(peer = %id, is_hub, "MemoryNetwork::attach: called");
        state.endpoints.insert(id.clone(), tx);

        let transport = MemoryTransport {
            me: id,
            is_hub,
            state: self.state.clone(),
        };
        (transport, rx)
    }
}

fn lock(state: &Mutex<NetworkState>) -> MutexGuard<'_, NetworkState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    me: PeerId,
    is_hub: bool,
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryTransport {
    /// This endpoint's id, as seen by the receiving side
    pub fn id(&self) -> &PeerId {
        &self.me
    }

    fn deliver(&self, to: &PeerId, message: &Message) -> Result<(), TransportError> {
        if !self.is_hub && *to != PeerId::coordinator() {
            return Err(TransportError::PeerNotFound(to.clone()));
        }

        let (tx, faults) = {
            let state = lock(&self.state);
            let tx = state
                .endpoints
                .get(to)
                .cloned()
                .ok_or_else(|| TransportError::PeerNotFound(to.clone()))?;
            (tx, state.faults)
        };

        let copies = {
            let mut rng = rand::rng();
            if faults.drop_rate > 0.0 && rng.random_bool(faults.drop_rate.clamp(0.0, 1.0)) {
                debug!(from = %self.me, %to, kind = message.kind(), "MemoryTransport: dropped by fault injection");
                return Ok(());
            }
            if faults.duplicate_rate > 0.0 && rng.random_bool(faults.duplicate_rate.clamp(0.0, 1.0)) {
                2
            } else {
                1
            }
        };

        for _ in 0..copies {
            let inbound = Inbound {
                message: message.clone(),
                from: self.me.clone(),
            };
            tx.try_send(inbound).map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Full(to.clone()),
                TrySendError::Closed(_) => TransportError::Closed(to.clone()),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, target: Option<&PeerId>, message: &Message) -> Result<(), TransportError> {
        match target {
            Some(peer) => self.deliver(peer, message),
            None if self.is_hub => {
                let mut first_error = None;
                for peer in self.peers() {
                    if let Err(e) = self.deliver(&peer, message) {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            None => self.deliver(&PeerId::coordinator(), message),
        }
    }

    fn peers(&self) -> Vec<PeerId> {
        let state = lock(&self.state);
        if self.is_hub {
            let mut peers: Vec<PeerId> = state.endpoints.keys().filter(|id| **id != self.me).cloned().collect();
            peers.sort();
            peers
        } else if state.endpoints.contains_key(&PeerId::coordinator()) {
            vec![PeerId::coordinator()]
        } else {
            Vec::new()
        }
    }
}
