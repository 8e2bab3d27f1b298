//! hubrpc - correlated calls, events and replicated values through a hub
//!
//! One coordinator process relays between any number of peer processes. Peers
//! never talk to each other directly; everything goes through the hub.
//!
//! # Core Concepts
//!
//! - **At most once**: a retried Call reuses its id, and the handling process runs
//!   the handler once per id no matter how many copies arrive
//! - **Best-effort transport**: messages may be dropped, duplicated or reordered;
//!   timeouts and retries on the caller side absorb it
//! - **One actor per process**: a single Broker task owns every table
//!
//! # Modules
//!
//! - [`broker`] - Correlation engine, event bus and relay
//! - [`transport`] - Transport contract plus in-memory and Unix-socket hubs
//! - [`value`] - Replicated values and their registry
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod broker;
pub mod cli;
pub mod config;
pub mod transport;
pub mod value;

pub use broker::{Broker, BrokerConfig, BrokerHandle, CallOptions, HandlerId, Message, ProcessKind, RpcError};
pub use config::Config;
pub use transport::{Inbound, PeerId, Transport, TransportError};
pub use value::{RemoteValue, ValueError, ValueRegistry, ValueState};
