//! BrokerHandle - Client interface for calls, handlers and events

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::config::CallOptions;
use super::error::RpcError;
use super::messages::{BrokerMetrics, BrokerRequest};
use super::role::ProcessKind;
use super::tables::{Callback, Handler, HandlerId};

/// Handle for talking to a Broker task
///
/// This handle is cloneable and can be passed to any task in the process.
/// Registrations return once the Broker has applied them, so a message that
/// arrives afterwards sees the new handler. `call` waits for the Response.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<BrokerRequest>,
    kind: ProcessKind,
    call_options: CallOptions,
    value_fetch_options: CallOptions,
}

impl BrokerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<BrokerRequest>,
        kind: ProcessKind,
        call_options: CallOptions,
        value_fetch_options: CallOptions,
    ) -> Self {
        debug!(%kind, "BrokerHandle::new: called");
        Self {
            tx,
            kind,
            call_options,
            value_fetch_options,
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn is_coordinator(&self) -> bool {
        self.kind == ProcessKind::Coordinator
    }

    /// Options `call` uses
    pub fn call_options(&self) -> CallOptions {
        self.call_options
    }

    /// Options a replicated value uses for its initial fetch
    pub fn value_fetch_options(&self) -> CallOptions {
        self.value_fetch_options
    }

    /// Call `name` with the default timeout and retry budget
    pub async fn call(&self, name: &str, data: Value) -> Result<Value, RpcError> {
        self.call_with(name, data, self.call_options).await
    }

    /// Call `name`, waiting up to `options.timeout` per attempt
    ///
    /// Every attempt re-sends the same Call id, so a handler that already saw the
    /// call does not run again.
    pub async fn call_with(&self, name: &str, data: Value, options: CallOptions) -> Result<Value, RpcError> {
        debug!(%name, ?options, "BrokerHandle::call_with: called");
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(BrokerRequest::Call {
            name: name.to_string(),
            data,
            options,
            reply_tx,
        })
        .await?;

        // the broker owns the timeout
        reply_rx.await.map_err(|_| RpcError::Closed)?
    }

    /// Call `name` with a serializable payload and decode the result
    pub async fn call_as<T, D>(&self, name: &str, data: &D) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data)?;
        let result = self.call(name, data).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Broadcast an event; never waits for delivery
    pub async fn emit(&self, name: &str, data: Value) -> Result<(), RpcError> {
        debug!(%name, "BrokerHandle::emit: called");
        self.send(BrokerRequest::Emit {
            name: name.to_string(),
            data,
        })
        .await
    }

    /// Register the handler for `name`, replacing any previous one
    pub async fn handle<F, Fut>(&self, name: &str, handler: F) -> Result<HandlerId, RpcError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |data| handler(data).boxed());
        self.handle_boxed(name, handler).await
    }

    pub(crate) async fn handle_boxed(&self, name: &str, handler: Handler) -> Result<HandlerId, RpcError> {
        let id = HandlerId::next();
        debug!(%id, %name, "BrokerHandle::handle: called");
        self.send_acked(|ack_tx| BrokerRequest::Handle {
            id,
            name: name.to_string(),
            handler,
            ack_tx,
        })
        .await?;
        Ok(id)
    }

    /// Register the event callback for `name`, replacing any previous one
    pub async fn on<F>(&self, name: &str, callback: F) -> Result<HandlerId, RpcError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = HandlerId::next();
        debug!(%id, %name, "BrokerHandle::on: called");
        let callback: Callback = Arc::new(callback);
        self.send_acked(|ack_tx| BrokerRequest::On {
            id,
            name: name.to_string(),
            callback,
            ack_tx,
        })
        .await?;
        Ok(id)
    }

    /// Unregister a handler or callback; no-op if it is already gone
    pub async fn remove(&self, id: HandlerId) -> Result<(), RpcError> {
        debug!(%id, "BrokerHandle::remove: called");
        self.send_acked(|ack_tx| BrokerRequest::Remove { id, ack_tx }).await
    }

    /// Get current Broker metrics
    pub async fn metrics(&self) -> Result<BrokerMetrics, RpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BrokerRequest::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| RpcError::Closed)
    }

    /// Request shutdown of the Broker
    pub async fn shutdown(&self) -> Result<(), RpcError> {
        debug!("BrokerHandle::shutdown: called");
        self.send(BrokerRequest::Shutdown).await
    }

    /// Check whether the Broker task is still accepting requests
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, req: BrokerRequest) -> Result<(), RpcError> {
        self.tx.send(req).await.map_err(|_| RpcError::Closed)
    }

    /// Send a table change and wait until the Broker has applied it
    async fn send_acked(&self, build: impl FnOnce(oneshot::Sender<()>) -> BrokerRequest) -> Result<(), RpcError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(build(ack_tx)).await?;
        ack_rx.await.map_err(|_| RpcError::Closed)
    }
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("kind", &self.kind)
            .field("call_options", &self.call_options)
            .finish()
    }
}
