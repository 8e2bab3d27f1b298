//! Handler, callback and call-tracking tables owned by the broker task

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

/// Future returned by a call handler
pub type HandlerFuture = BoxFuture<'static, eyre::Result<Value>>;

/// Asynchronous call handler
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Event callback
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one `handle()` or `on()` registration
///
/// Pass it to `remove()` to unregister exactly that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// One entry per name; a second registration replaces the first
pub(crate) struct NamedTable<F> {
    entries: HashMap<String, (HandlerId, F)>,
}

impl<F> Default for NamedTable<F> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<F> NamedTable<F> {
    /// Register `entry` under `name`, returning the id it replaced
    pub fn insert(&mut self, name: String, id: HandlerId, entry: F) -> Option<HandlerId> {
        self.entries.insert(name, (id, entry)).map(|(old, _)| old)
    }

    pub fn get(&self, name: &str) -> Option<&F> {
        self.entries.get(name).map(|(_, entry)| entry)
    }

    /// Remove whichever name is currently held by `id`
    pub fn remove_id(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, (held, _)| *held != id);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Insertion-ordered map that evicts its oldest key once full
pub(crate) struct RecentMap<V> {
    map: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> RecentMap<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }

        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!(key = %oldest, "RecentMap::insert: evicting");
                self.map.remove(&oldest);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
