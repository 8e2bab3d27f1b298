//! Transport error types

use thiserror::Error;

use super::PeerId;

/// Errors that can occur while moving a message between processes
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not connected: {0}")]
    PeerNotFound(PeerId),

    #[error("Channel to {0} closed")]
    Closed(PeerId),

    #[error("Channel to {0} full, message dropped")]
    Full(PeerId),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Check if the connection itself is gone, as opposed to one bad frame
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::PeerNotFound(_) | TransportError::Closed(_) | TransportError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_large_message() {
        let err = TransportError::MessageTooLarge { size: 2048, max: 1024 };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(TransportError::PeerNotFound(PeerId::new("a")).is_disconnect());
        assert!(TransportError::Closed(PeerId::new("a")).is_disconnect());
        assert!(!TransportError::Full(PeerId::new("a")).is_disconnect());
    }
}
