//! Replicated value error types

use thiserror::Error;

use crate::broker::RpcError;

/// Errors surfaced by replicated values and their registry
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("Value '{name}' is registered with a different type")]
    TypeMismatch { name: String },

    #[error("Initial fetch for '{name}' failed: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Value codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for ValueError {
    fn from(err: serde_json::Error) -> Self {
        ValueError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_message() {
        let err = ValueError::FetchFailed {
            name: "volume".to_string(),
            reason: "timed out".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("volume"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_rpc_error_is_transparent() {
        let err: ValueError = RpcError::Closed.into();
        assert_eq!(err.to_string(), RpcError::Closed.to_string());
    }
}
