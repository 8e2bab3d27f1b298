//! Transport configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Unix socket the hub listens on
    #[serde(default = "super::get_socket_path")]
    pub socket_path: PathBuf,

    /// Max encoded message size in bytes (1MB default)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Inbound queue size feeding the broker
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Outbound queue size per connection
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_inbound_buffer() -> usize {
    1024
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: super::get_socket_path(),
            max_message_size: default_max_message_size(),
            inbound_buffer: default_inbound_buffer(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.inbound_buffer, 1024);
        assert_eq!(config.outbound_buffer, 256);
        assert!(config.socket_path.ends_with("hub.sock"));
    }

    #[test]
    fn test_socket_path_override() {
        let config: TransportConfig = serde_yaml::from_str("socket_path: /tmp/x.sock").unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.inbound_buffer, 1024);
    }
}
