//! Relay / fan-out
//!
//! Wraps the process role with the coordinator's route table: when a Call from
//! peer A is relayed, A is remembered under the call id so the Response goes back
//! to A alone instead of being fanned out to everyone.

use tracing::debug;

use super::messages::Message;
use super::role::Role;
use super::tables::RecentMap;
use crate::transport::PeerId;

pub(crate) struct Relay {
    role: Box<dyn Role>,
    routes: RecentMap<PeerId>,
}

impl Relay {
    pub fn new(role: Box<dyn Role>, route_capacity: usize) -> Self {
        Self {
            role,
            routes: RecentMap::new(route_capacity),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.role.is_coordinator()
    }

    /// Where to forward a message that arrived from `origin` and was not consumed here
    pub fn targets(&mut self, message: &Message, origin: &PeerId, peers: &[PeerId]) -> Vec<PeerId> {
        let targets = self.role.route(message, origin, peers);
        if targets.is_empty() {
            return targets;
        }

        match message {
            Message::Call { id, .. } => {
                self.routes.insert(id.clone(), origin.clone());
                targets
            }
            Message::Response { id, .. } => match self.routes.get(id) {
                Some(back) if back != origin => {
                    debug!(%id, peer = %back, "Relay::targets: routing response to caller");
                    vec![back.clone()]
                }
                Some(_) => Vec::new(),
                None => targets,
            },
            Message::Event { .. } => targets,
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
