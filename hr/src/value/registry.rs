//! Per-process registry of replicated values
//!
//! At most one live instance per name. Asking again for a registered name
//! returns the existing instance and leaves its wiring alone.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::ValueError;
use super::remote::{RemoteValue, Replicable};
use crate::broker::{BrokerHandle, CallOptions, HandlerId};

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    wiring: Vec<HandlerId>,
}

/// Registry of replicated values for one broker
#[derive(Clone)]
pub struct ValueRegistry {
    broker: BrokerHandle,
    fetch: CallOptions,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ValueRegistry {
    /// Create a registry using the broker's initial-fetch options
    pub fn new(broker: BrokerHandle) -> Self {
        let fetch = broker.value_fetch_options();
        Self::with_fetch_options(broker, fetch)
    }

    pub fn with_fetch_options(broker: BrokerHandle, fetch: CallOptions) -> Self {
        debug!(?fetch, "ValueRegistry::new: called");
        Self {
            broker,
            fetch,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the instance registered under `name`, creating it if needed
    ///
    /// `initial` is only used when the instance is created here; an existing
    /// instance is returned unchanged.
    pub async fn get_or_create<T: Replicable>(&self, name: &str, initial: Option<T>) -> Result<RemoteValue<T>, ValueError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(name) {
            debug!(%name, "ValueRegistry::get_or_create: returning existing instance");
            return downcast(name, entry);
        }

        let (value, wiring) = RemoteValue::create(self.broker.clone(), name, initial, self.fetch).await?;
        entries.insert(
            name.to_string(),
            Entry {
                value: Box::new(value.clone()),
                wiring,
            },
        );
        Ok(value)
    }

    /// Look up an existing instance without creating one
    pub async fn get<T: Replicable>(&self, name: &str) -> Result<Option<RemoteValue<T>>, ValueError> {
        let entries = self.entries.lock().await;
        entries.get(name).map(|entry| downcast(name, entry)).transpose()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.lock().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Forget `name` and unwire its handler and subscription
    ///
    /// Existing holders keep their local value but stop receiving updates.
    /// Returns false if nothing was registered.
    pub async fn deregister(&self, name: &str) -> Result<bool, ValueError> {
        let entry = self.entries.lock().await.remove(name);
        match entry {
            Some(entry) => {
                info!(%name, "Deregistering replicated value");
                self.unwire(entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deregister every value
    pub async fn clear(&self) -> Result<(), ValueError> {
        let drained: Vec<(String, Entry)> = self.entries.lock().await.drain().collect();
        info!(count = drained.len(), "Clearing value registry");
        for (name, entry) in drained {
            debug!(%name, "ValueRegistry::clear: unwiring");
            self.unwire(entry).await?;
        }
        Ok(())
    }

    async fn unwire(&self, entry: Entry) -> Result<(), ValueError> {
        for id in entry.wiring {
            self.broker.remove(id).await?;
        }
        Ok(())
    }
}

fn downcast<T: Replicable>(name: &str, entry: &Entry) -> Result<RemoteValue<T>, ValueError> {
    entry
        .value
        .downcast_ref::<RemoteValue<T>>()
        .cloned()
        .ok_or_else(|| ValueError::TypeMismatch { name: name.to_string() })
}
