//! Main Broker task implementation

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::BrokerConfig;
use super::error::RpcError;
use super::handle::BrokerHandle;
use super::messages::{BrokerMetrics, BrokerRequest, Message};
use super::relay::Relay;
use super::role::ProcessKind;
use super::tables::{Callback, Handler, NamedTable, RecentMap};
use crate::transport::{Inbound, PeerId, Transport};

/// Caller-side bookkeeping for one outstanding call
struct PendingCall {
    name: String,
    reply_tx: oneshot::Sender<Result<Value, RpcError>>,
    message: Message,
    attempts: u32,
    max_attempts: u32,
    timeout: Duration,
    timer: AbortHandle,
}

/// A handler execution that has produced its outcome
struct Finished {
    id: String,
    name: String,
    origin: PeerId,
    result: eyre::Result<Value>,
}

type Running = FuturesUnordered<BoxFuture<'static, Finished>>;

/// The Broker owns every table for one process and serializes all work on them
pub struct Broker {
    config: BrokerConfig,
    kind: ProcessKind,
    transport: Box<dyn Transport>,
    inbound: mpsc::Receiver<Inbound>,
    tx: mpsc::Sender<BrokerRequest>,
    rx: mpsc::Receiver<BrokerRequest>,
}

impl Broker {
    /// Create a Broker over `transport`, consuming its inbound queue
    pub fn new(
        config: BrokerConfig,
        kind: ProcessKind,
        transport: impl Transport,
        inbound: mpsc::Receiver<Inbound>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        Self {
            config,
            kind,
            transport: Box::new(transport),
            inbound,
            tx,
            rx,
        }
    }

    /// Create a handle; handles can be created before or after `run` starts
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle::new(
            self.tx.clone(),
            self.kind,
            self.config.call_options(),
            self.config.value_fetch_options(),
        )
    }

    /// Spawn the Broker task and return a handle to it
    pub fn spawn(self) -> (BrokerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run the Broker task
    ///
    /// Runs until shutdown is requested or every handle has been dropped. Calls
    /// still pending at that point are rejected with [`RpcError::Closed`].
    pub async fn run(self) {
        let Broker {
            config,
            kind,
            transport,
            mut inbound,
            tx,
            mut rx,
        } = self;

        // timers must not keep the loop alive once every handle is gone
        let timer_tx = tx.downgrade();
        drop(tx);

        let mut engine = Engine {
            relay: Relay::new(kind.role(), config.route_capacity),
            transport,
            timer_tx,
            handlers: NamedTable::default(),
            events: NamedTable::default(),
            pending: HashMap::new(),
            in_flight: HashSet::new(),
            completed: RecentMap::new(config.completed_capacity),
            metrics: BrokerMetrics::default(),
        };
        let mut running: Running = FuturesUnordered::new();
        let mut inbound_open = true;

        info!(%kind, "Broker started");

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(BrokerRequest::Shutdown) => {
                        info!("Broker shutting down");
                        break;
                    }
                    Some(req) => engine.on_request(req).await,
                    None => {
                        debug!("Broker: all handles dropped");
                        break;
                    }
                },

                msg = inbound.recv(), if inbound_open => match msg {
                    Some(Inbound { message, from }) => {
                        if let Some(execution) = engine.on_inbound(message, from).await {
                            running.push(execution);
                        }
                    }
                    None => {
                        warn!("Broker: transport inbound queue closed");
                        inbound_open = false;
                    }
                },

                Some(finished) = running.next(), if !running.is_empty() => {
                    engine.on_finished(finished).await;
                }
            }
        }

        engine.close();
        info!(metrics = ?engine.metrics, "Broker stopped");
    }
}

/// Mutable per-process state, touched only from the Broker task
struct Engine {
    relay: Relay,
    transport: Box<dyn Transport>,
    timer_tx: mpsc::WeakSender<BrokerRequest>,
    handlers: NamedTable<Handler>,
    events: NamedTable<Callback>,
    pending: HashMap<String, PendingCall>,
    in_flight: HashSet<String>,
    completed: RecentMap<Message>,
    metrics: BrokerMetrics,
}

impl Engine {
    async fn on_request(&mut self, req: BrokerRequest) {
        match req {
            BrokerRequest::Call {
                name,
                data,
                options,
                reply_tx,
            } => {
                let id = Uuid::now_v7().to_string();
                debug!(%id, %name, ?options, "Starting call");

                let message = Message::Call {
                    id: id.clone(),
                    name: name.clone(),
                    data,
                };
                self.send(None, &message).await;

                let timer = self.schedule_retry(id.clone(), options.timeout);
                self.pending.insert(
                    id,
                    PendingCall {
                        name,
                        reply_tx,
                        message,
                        attempts: 1,
                        max_attempts: options.attempts(),
                        timeout: options.timeout,
                        timer,
                    },
                );
            }

            BrokerRequest::Emit { name, data } => {
                debug!(%name, "Emitting event");
                self.send(None, &Message::Event { name, data }).await;
            }

            BrokerRequest::Handle {
                id,
                name,
                handler,
                ack_tx,
            } => {
                debug!(%id, %name, "Registering handler");
                if let Some(replaced) = self.handlers.insert(name.clone(), id, handler) {
                    debug!(%replaced, %name, "Handler replaced");
                }
                let _ = ack_tx.send(());
            }

            BrokerRequest::On {
                id,
                name,
                callback,
                ack_tx,
            } => {
                debug!(%id, %name, "Registering event callback");
                if let Some(replaced) = self.events.insert(name.clone(), id, callback) {
                    debug!(%replaced, %name, "Event callback replaced");
                }
                let _ = ack_tx.send(());
            }

            BrokerRequest::Remove { id, ack_tx } => {
                let removed = self.handlers.remove_id(id) | self.events.remove_id(id);
                debug!(%id, removed, "Removing registration");
                let _ = ack_tx.send(());
            }

            BrokerRequest::RetryTick { id } => self.on_retry_tick(id).await,

            BrokerRequest::GetMetrics { reply_tx } => {
                let mut metrics = self.metrics.clone();
                metrics.pending_calls = self.pending.len();
                metrics.in_flight = self.in_flight.len();
                metrics.handlers = self.handlers.len();
                metrics.events = self.events.len();
                let _ = reply_tx.send(metrics);
            }

            // handled by the run loop
            BrokerRequest::Shutdown => {}
        }
    }

    async fn on_retry_tick(&mut self, id: String) {
        let Some(mut pending) = self.pending.remove(&id) else {
            // resolved after the timer fired
            return;
        };

        if pending.reply_tx.is_closed() {
            debug!(%id, name = %pending.name, "Caller gone, abandoning call");
            return;
        }

        if pending.attempts < pending.max_attempts {
            pending.attempts += 1;
            self.metrics.retries += 1;
            debug!(%id, name = %pending.name, attempt = pending.attempts, "Retrying call");

            self.send(None, &pending.message).await;
            pending.timer = self.schedule_retry(id.clone(), pending.timeout);
            self.pending.insert(id, pending);
        } else {
            warn!(%id, name = %pending.name, attempts = pending.attempts, "Call timed out");
            self.metrics.call_timeouts += 1;
            let _ = pending.reply_tx.send(Err(RpcError::Timeout {
                name: pending.name,
                attempts: pending.attempts,
                timeout: pending.timeout,
            }));
        }
    }

    /// Process one inbound message; returns a handler execution to poll, if one started
    async fn on_inbound(&mut self, message: Message, from: PeerId) -> Option<BoxFuture<'static, Finished>> {
        self.metrics.messages_received += 1;

        match message {
            Message::Call { ref id, ref name, .. } if self.handlers.get(name).is_some() => {
                if self.in_flight.contains(id) {
                    debug!(%id, %name, %from, "Duplicate call while in flight, ignoring");
                    self.metrics.duplicates_suppressed += 1;
                    return None;
                }

                if let Some(response) = self.completed.get(id).cloned() {
                    debug!(%id, %name, %from, "Duplicate call already answered, resending response");
                    self.metrics.duplicates_suppressed += 1;
                    self.send(Some(&from), &response).await;
                    return None;
                }

                let Message::Call { id, name, data } = message else {
                    return None;
                };
                let handler = self.handlers.get(&name)?.clone();
                debug!(%id, %name, %from, "Invoking handler");
                self.in_flight.insert(id.clone());
                Some(execute(handler, id, name, data, from))
            }

            Message::Call { ref id, ref name, .. } => {
                if self.relay.is_coordinator() {
                    debug!(%id, %name, %from, "No local handler, relaying call");
                    self.forward(&message, &from).await;
                } else {
                    debug!(%id, %name, "No handler for call, discarding");
                }
                None
            }

            Message::Response { ref id, .. } => {
                if let Some(pending) = self.pending.remove(id) {
                    pending.timer.abort();
                    let outcome = match message.outcome() {
                        Some(Err(error)) => Err(RpcError::Handler {
                            name: pending.name,
                            error,
                        }),
                        Some(Ok(data)) => Ok(data),
                        None => Ok(Value::Null),
                    };
                    debug!(%id, ok = outcome.is_ok(), "Resolving call");
                    let _ = pending.reply_tx.send(outcome);
                } else if self.relay.is_coordinator() {
                    self.forward(&message, &from).await;
                } else {
                    debug!(%id, "Response for unknown or settled call, dropping");
                    self.metrics.duplicates_suppressed += 1;
                }
                None
            }

            Message::Event { ref name, ref data } => {
                match self.events.get(name) {
                    Some(callback) => {
                        let callback = callback.clone();
                        let data = data.clone();
                        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                            warn!(%name, "Event callback panicked");
                        }
                    }
                    None => debug!(%name, "No callback for event"),
                }

                if self.relay.is_coordinator() {
                    self.forward(&message, &from).await;
                }
                None
            }
        }
    }

    async fn on_finished(&mut self, finished: Finished) {
        let Finished {
            id,
            name,
            origin,
            result,
        } = finished;

        let response = match result {
            Ok(data) => Message::response(id.clone(), Ok(data)),
            Err(e) => {
                warn!(%id, %name, error = %e, "Handler failed");
                Message::response(id.clone(), Err(Value::String(format!("{e:#}"))))
            }
        };

        self.send(Some(&origin), &response).await;
        self.in_flight.remove(&id);
        self.completed.insert(id, response);
    }

    /// Relay a message that arrived from `origin` to whoever else should see it
    async fn forward(&mut self, message: &Message, origin: &PeerId) {
        let peers = self.transport.peers();
        let targets = self.relay.targets(message, origin, &peers);
        debug!(kind = message.kind(), id = ?message.id(), %origin, targets = targets.len(), "Forwarding message");
        for target in &targets {
            if self.send(Some(target), message).await {
                self.metrics.relayed += 1;
            }
        }
    }

    /// Send one message; failures are logged and counted, never returned
    async fn send(&mut self, target: Option<&PeerId>, message: &Message) -> bool {
        match self.transport.send(target, message).await {
            Ok(()) => {
                self.metrics.messages_sent += 1;
                true
            }
            Err(e) => {
                warn!(target = ?target, kind = message.kind(), id = ?message.id(), error = %e, "Send failed");
                self.metrics.send_failures += 1;
                false
            }
        }
    }

    fn schedule_retry(&self, id: String, after: Duration) -> AbortHandle {
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx.send(BrokerRequest::RetryTick { id }).await;
            }
        })
        .abort_handle()
    }

    /// Reject everything still outstanding
    fn close(&mut self) {
        for (id, pending) in self.pending.drain() {
            debug!(%id, name = %pending.name, "Rejecting pending call on shutdown");
            pending.timer.abort();
            let _ = pending.reply_tx.send(Err(RpcError::Closed));
        }
    }
}

/// Run a handler to completion, turning a panic into an error outcome
fn execute(handler: Handler, id: String, name: String, data: Value, origin: PeerId) -> BoxFuture<'static, Finished> {
    async move {
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(data))) {
            Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(eyre::eyre!("Handler panicked")),
            },
            Err(_) => Err(eyre::eyre!("Handler panicked")),
        };
        Finished {
            id,
            name,
            origin,
            result,
        }
    }
    .boxed()
}
