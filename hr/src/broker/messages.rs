//! Message types for the Broker
//!
//! [`Message`] is the wire format shared by every process. [`BrokerRequest`] is the
//! internal queue feeding the broker task.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::config::CallOptions;
use super::error::RpcError;
use super::tables::{Callback, Handler, HandlerId};

/// Messages exchanged between processes
///
/// Three kinds share one channel and are told apart by the `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    /// Correlated request expecting exactly one Response
    Call {
        id: String,
        name: String,
        #[serde(default)]
        data: Value,
    },

    /// Answer to a Call, matched by id
    ///
    /// The call failed only when `error` is set to something truthy: `null`,
    /// `false`, `0` and `""` all mean success and `data` is the result.
    Response {
        id: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        error: Option<Value>,
    },

    /// Uncorrelated broadcast
    Event {
        name: String,
        #[serde(default)]
        data: Value,
    },
}

impl Message {
    /// Build a Response from a handler outcome
    pub fn response(id: impl Into<String>, outcome: Result<Value, Value>) -> Self {
        match outcome {
            Ok(data) => Self::Response {
                id: id.into(),
                data,
                error: None,
            },
            Err(error) => Self::Response {
                id: id.into(),
                data: Value::Null,
                error: Some(error),
            },
        }
    }

    /// The `kind` tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Response { .. } => "response",
            Self::Event { .. } => "event",
        }
    }

    /// Settle a Response into the caller's outcome; `None` for other kinds
    pub fn outcome(&self) -> Option<Result<Value, Value>> {
        match self {
            Self::Response { error: Some(error), .. } if is_truthy(error) => Some(Err(error.clone())),
            Self::Response { data, .. } => Some(Ok(data.clone())),
            _ => None,
        }
    }

    /// Correlation id, for calls and responses
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Call { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Event { .. } => None,
        }
    }

    /// Logical name, for calls and events
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Call { name, .. } | Self::Event { name, .. } => Some(name),
            Self::Response { .. } => None,
        }
    }
}

/// Internal requests to the Broker task
pub(crate) enum BrokerRequest {
    /// Start a correlated call
    Call {
        name: String,
        data: Value,
        options: CallOptions,
        reply_tx: oneshot::Sender<Result<Value, RpcError>>,
    },

    /// Broadcast an event
    Emit { name: String, data: Value },

    /// Register a call handler
    Handle {
        id: HandlerId,
        name: String,
        handler: Handler,
        ack_tx: oneshot::Sender<()>,
    },

    /// Register an event callback
    On {
        id: HandlerId,
        name: String,
        callback: Callback,
        ack_tx: oneshot::Sender<()>,
    },

    /// Drop a handler or callback by registration id
    Remove {
        id: HandlerId,
        ack_tx: oneshot::Sender<()>,
    },

    /// Retry timer fired for a pending call (internal)
    RetryTick { id: String },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<BrokerMetrics>,
    },

    /// Shutdown the broker
    Shutdown,
}

/// Broker metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerMetrics {
    pub pending_calls: usize,
    pub in_flight: usize,
    pub handlers: usize,
    pub events: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub relayed: u64,
    pub retries: u64,
    pub call_timeouts: u64,
    pub duplicates_suppressed: u64,
    pub send_failures: u64,
}

/// Whether a Response `error` value marks a failure
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
