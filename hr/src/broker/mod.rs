//! Broker for correlated calls and events
//!
//! One Broker task per process owns every table and is the only place they are
//! mutated. It provides two primitives:
//! - **Call:** request/response matched by id, with per-attempt timeout and retry
//! - **Event:** fire-and-forget broadcast to named callbacks
//!
//! On the coordinator the Broker also relays whatever it does not consume, so
//! peers reach each other through the hub.

mod config;
mod core;
mod error;
mod handle;
mod messages;
mod relay;
mod role;
mod tables;

pub use config::{BrokerConfig, CallOptions};
pub use core::Broker;
pub use error::RpcError;
pub use handle::BrokerHandle;
pub use messages::{BrokerMetrics, Message};
pub use role::{CoordinatorRole, PeerRole, ProcessKind, Role};
pub use tables::{Callback, Handler, HandlerFuture, HandlerId};
