//! Broker error types

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the caller of a broker operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("Call '{name}' timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        name: String,
        attempts: u32,
        timeout: Duration,
    },

    #[error("Handler for '{name}' failed: {error}")]
    Handler { name: String, error: Value },

    #[error("Broker channel closed")]
    Closed,

    #[error("Payload codec error: {0}")]
    Codec(String),
}

impl RpcError {
    /// Check if the call ran out of attempts
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    /// The remote handler's error payload, if that is what failed
    pub fn handler_error(&self) -> Option<&Value> {
        match self {
            RpcError::Handler { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}
