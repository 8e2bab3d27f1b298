//! Replicated values
//!
//! A [`RemoteValue`] is kept in sync across processes on top of the broker:
//! - `<name>-init` call, answered by the coordinator, for the initial pull
//! - `<name>-update` event for every change
//!
//! Obtain instances through a [`ValueRegistry`] so each name has one instance
//! per process.

mod error;
mod registry;
mod remote;

pub use error::ValueError;
pub use registry::ValueRegistry;
pub use remote::{RemoteValue, Replicable, ValueState};

/// Call name the coordinator answers with the current value
pub fn init_call_name(name: &str) -> String {
    format!("{name}-init")
}

/// Event name carrying every change
pub fn update_event_name(name: &str) -> String {
    format!("{name}-update")
}
