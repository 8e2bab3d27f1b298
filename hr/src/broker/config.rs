//! Broker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Per-attempt call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Re-sends after the first attempt (0 means one attempt total)
    #[serde(default)]
    pub call_retries: u32,

    /// Per-attempt timeout for a replicated value's initial fetch
    #[serde(default = "default_value_fetch_timeout_ms")]
    pub value_fetch_timeout_ms: u64,

    /// Re-sends for a replicated value's initial fetch
    #[serde(default = "default_value_fetch_retries")]
    pub value_fetch_retries: u32,

    /// Channel buffer size for broker requests
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Answered call ids remembered for late retries
    #[serde(default = "default_completed_capacity")]
    pub completed_capacity: usize,

    /// Relayed call origins remembered by the coordinator
    #[serde(default = "default_route_capacity")]
    pub route_capacity: usize,
}

fn default_call_timeout_ms() -> u64 {
    2000
}

fn default_value_fetch_timeout_ms() -> u64 {
    2500
}

fn default_value_fetch_retries() -> u32 {
    2
}

fn default_channel_buffer() -> usize {
    1000
}

fn default_completed_capacity() -> usize {
    1024
}

fn default_route_capacity() -> usize {
    4096
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            call_retries: 0,
            value_fetch_timeout_ms: default_value_fetch_timeout_ms(),
            value_fetch_retries: default_value_fetch_retries(),
            channel_buffer: default_channel_buffer(),
            completed_capacity: default_completed_capacity(),
            route_capacity: default_route_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Options used by `call()` when none are given
    pub fn call_options(&self) -> CallOptions {
        CallOptions::new(Duration::from_millis(self.call_timeout_ms)).with_retries(self.call_retries)
    }

    /// Options used for a replicated value's initial fetch
    pub fn value_fetch_options(&self) -> CallOptions {
        CallOptions::new(Duration::from_millis(self.value_fetch_timeout_ms)).with_retries(self.value_fetch_retries)
    }
}

/// Timeout and retry budget for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Wait per attempt before re-sending or giving up
    pub timeout: Duration,

    /// Re-sends after the first attempt
    pub retries: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(default_call_timeout_ms()))
    }
}

impl CallOptions {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, retries: 0 }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Attempts including the first send
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Worst-case wait before the call is rejected
    pub fn deadline(&self) -> Duration {
        self.timeout * self.attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.call_timeout_ms, 2000);
        assert_eq!(config.call_retries, 0);
        assert_eq!(config.value_fetch_timeout_ms, 2500);
        assert_eq!(config.value_fetch_retries, 2);
        assert_eq!(config.channel_buffer, 1000);
        assert_eq!(config.completed_capacity, 1024);
        assert_eq!(config.route_capacity, 4096);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: BrokerConfig = serde_yaml::from_str("call_retries: 3").unwrap();
        assert_eq!(config.call_retries, 3);
        assert_eq!(config.call_timeout_ms, 2000);
    }

    #[test]
    fn test_value_fetch_options() {
        let options = BrokerConfig::default().value_fetch_options();
        assert_eq!(options.timeout, Duration::from_millis(2500));
        assert_eq!(options.retries, 2);
        assert_eq!(options.attempts(), 3);
        assert_eq!(options.deadline(), Duration::from_millis(7500));
    }

    #[test]
    fn test_call_options_default_is_single_attempt() {
        let options = CallOptions::default();
        assert_eq!(options.attempts(), 1);
        assert_eq!(options.deadline(), Duration::from_secs(2));
    }
}
