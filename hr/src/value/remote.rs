//! A named value mirrored across processes
//!
//! Pull once on creation (`<name>-init`), then push every change
//! (`<name>-update`). The coordinator answers the pull for everyone.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::ValueError;
use super::{init_call_name, update_event_name};
use crate::broker::{BrokerHandle, CallOptions, HandlerId, RpcError};

/// Anything that can be carried in a replicated value
pub trait Replicable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Replicable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Lifecycle of one replicated value instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueState {
    Uninitialized,
    /// This process supplied the value and is publishing it
    Seeding,
    /// Waiting on the coordinator's answer to `<name>-init`
    Fetching,
    Ready,
    /// The initial fetch ran out of attempts
    Failed(String),
}

impl ValueState {
    /// Ready or Failed; a settled state never changes again
    pub fn is_settled(&self) -> bool {
        matches!(self, ValueState::Ready | ValueState::Failed(_))
    }
}

struct Inner<T> {
    name: String,
    broker: BrokerHandle,
    value: watch::Sender<Option<T>>,
    state: watch::Sender<ValueState>,
    /// Set once any update, local or remote, has been applied
    updated: AtomicBool,
}

impl<T: Replicable> Inner<T> {
    fn transition(&self, next: ValueState) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_settled() {
                false
            } else {
                *state = next.clone();
                true
            }
        });
        if changed {
            debug!(name = %self.name, state = ?next, "RemoteValue: state changed");
        }
    }

    fn apply(&self, value: Option<T>) {
        self.value.send_modify(|current| {
            self.updated.store(true, Ordering::SeqCst);
            *current = value;
        });
    }

    fn apply_remote(&self, data: Value) {
        match serde_json::from_value::<Option<T>>(data) {
            Ok(value) => {
                debug!(name = %self.name, "RemoteValue: applying update");
                self.apply(value);
            }
            Err(e) => warn!(name = %self.name, error = %e, "Ignoring undecodable update"),
        }
    }

    fn snapshot(&self) -> eyre::Result<Value> {
        Ok(serde_json::to_value(&*self.value.borrow())?)
    }

    async fn fetch(&self, options: CallOptions) {
        let result = self
            .broker
            .call_with(&init_call_name(&self.name), Value::Null, options)
            .await
            .and_then(|data| serde_json::from_value::<Option<T>>(data).map_err(RpcError::from));

        match result {
            Ok(fetched) => {
                // an update that landed while fetching is newer than the snapshot
                let applied = self.value.send_if_modified(|current| {
                    if self.updated.load(Ordering::SeqCst) {
                        false
                    } else {
                        *current = fetched;
                        true
                    }
                });
                debug!(name = %self.name, applied, "RemoteValue: initial fetch complete");
                self.transition(ValueState::Ready);
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "RemoteValue: initial fetch failed");
                self.transition(ValueState::Failed(e.to_string()));
            }
        }
    }
}

/// Local view of a replicated value
///
/// Cheap to clone; clones share the same state.
pub struct RemoteValue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RemoteValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Replicable> RemoteValue<T> {
    /// Build an instance and wire it into the broker
    ///
    /// Returns the registrations made, so the registry can undo them.
    pub(crate) async fn create(
        broker: BrokerHandle,
        name: &str,
        initial: Option<T>,
        fetch: CallOptions,
    ) -> Result<(Self, Vec<HandlerId>), ValueError> {
        debug!(%name, has_initial = initial.is_some(), kind = %broker.kind(), "RemoteValue::create: called");
        let (value_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(ValueState::Uninitialized);
        let this = Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                broker: broker.clone(),
                value: value_tx,
                state: state_tx,
                updated: AtomicBool::new(false),
            }),
        };

        let mut wiring = Vec::new();

        let weak: Weak<Inner<T>> = Arc::downgrade(&this.inner);
        let id = broker
            .on(&update_event_name(name), move |data| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_remote(data);
                }
            })
            .await?;
        wiring.push(id);

        if broker.is_coordinator() {
            let weak: Weak<Inner<T>> = Arc::downgrade(&this.inner);
            let id = broker
                .handle(&init_call_name(name), move |_data| {
                    let snapshot = match weak.upgrade() {
                        Some(inner) => inner.snapshot(),
                        None => Ok(Value::Null),
                    };
                    future::ready(snapshot)
                })
                .await?;
            wiring.push(id);
        }

        match initial {
            Some(initial) => {
                this.inner.transition(ValueState::Seeding);
                let data = serde_json::to_value(&initial)?;
                this.inner.value.send_replace(Some(initial));
                broker.emit(&update_event_name(name), data).await?;
                this.inner.transition(ValueState::Ready);
            }
            None if broker.is_coordinator() => this.inner.transition(ValueState::Ready),
            None => {
                this.inner.transition(ValueState::Fetching);
                let inner = this.inner.clone();
                tokio::spawn(async move { inner.fetch(fetch).await });
            }
        }

        info!(%name, state = ?this.state(), "Replicated value created");
        Ok((this, wiring))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current value; `None` until one is known
    pub fn get(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Observe every change to the local value
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.inner.value.subscribe()
    }

    pub fn state(&self) -> ValueState {
        self.inner.state.borrow().clone()
    }

    /// Wait until the instance holds an authoritative initial value
    ///
    /// Fails if the initial fetch ran out of attempts. The instance stays usable
    /// either way and keeps applying updates.
    pub async fn ready(&self) -> Result<(), ValueError> {
        let mut state_rx = self.inner.state.subscribe();
        let state = state_rx
            .wait_for(ValueState::is_settled)
            .await
            .map_err(|_| ValueError::Rpc(RpcError::Closed))?
            .clone();

        match state {
            ValueState::Failed(reason) => Err(ValueError::FetchFailed {
                name: self.inner.name.clone(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    /// Apply locally, then broadcast; does not wait for other processes
    pub async fn set_value(&self, value: T) -> Result<(), ValueError> {
        debug!(name = %self.inner.name, "RemoteValue::set_value: called");
        let data = serde_json::to_value(&value)?;
        self.inner.apply(Some(value));
        self.inner.broker.emit(&update_event_name(&self.inner.name), data).await?;
        Ok(())
    }
}

impl<T> fmt::Debug for RemoteValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteValue")
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerConfig, ProcessKind};
    use crate::transport::MemoryNetwork;
    use std::time::Duration;

    fn spawn(net: &MemoryNetwork, kind: ProcessKind, name: &str) -> BrokerHandle {
        let (transport, inbound) = match kind {
            ProcessKind::Coordinator => net.coordinator(),
            ProcessKind::Peer => net.peer(name),
        };
        Broker::new(BrokerConfig::default(), kind, transport, inbound).spawn().0
    }

    fn quick() -> CallOptions {
        CallOptions::new(Duration::from_millis(50)).with_retries(1)
    }

    #[tokio::test]
    async fn test_coordinator_without_value_is_ready() {
        let net = MemoryNetwork::new();
        let hub = spawn(&net, ProcessKind::Coordinator, "hub");

        let (value, wiring) = RemoteValue::<u32>::create(hub, "x", None, quick()).await.unwrap();
        assert_eq!(value.state(), ValueState::Ready);
        assert_eq!(value.get(), None);
        assert_eq!(wiring.len(), 2);
        value.ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_with_initial_value_skips_fetch() {
        let net = MemoryNetwork::new();
        let _hub = spawn(&net, ProcessKind::Coordinator, "hub");
        let a = spawn(&net, ProcessKind::Peer, "a");

        let (value, wiring) = RemoteValue::create(a, "x", Some(5u32), quick()).await.unwrap();
        assert_eq!(value.state(), ValueState::Ready);
        assert_eq!(value.get(), Some(5));
        assert_eq!(wiring.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_answer_fails_but_keeps_instance() {
        let net = MemoryNetwork::new();
        let _hub = spawn(&net, ProcessKind::Coordinator, "hub");
        let a = spawn(&net, ProcessKind::Peer, "a");

        let (value, _) = RemoteValue::<String>::create(a, "orphan", None, quick()).await.unwrap();
        assert_eq!(value.state(), ValueState::Fetching);

        let err = value.ready().await.unwrap_err();
        assert!(matches!(err, ValueError::FetchFailed { ref name, .. } if name == "orphan"));
        assert!(matches!(value.state(), ValueState::Failed(_)));

        value.set_value("local".to_string()).await.unwrap();
        assert_eq!(value.get(), Some("local".to_string()));
        assert!(matches!(value.state(), ValueState::Failed(_)));
    }

    #[tokio::test]
    async fn test_subscribe_sees_local_changes() {
        let net = MemoryNetwork::new();
        let hub = spawn(&net, ProcessKind::Coordinator, "hub");

        let (value, _) = RemoteValue::create(hub, "counter", Some(1i64), quick()).await.unwrap();
        let mut changes = value.subscribe();

        value.set_value(2).await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), Some(2));
    }

    #[test]
    fn test_settled_states() {
        assert!(ValueState::Ready.is_settled());
        assert!(ValueState::Failed("x".to_string()).is_settled());
        assert!(!ValueState::Fetching.is_settled());
        assert!(!ValueState::Seeding.is_settled());
        assert!(!ValueState::Uninitialized.is_settled());
    }
}
