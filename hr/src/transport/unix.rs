//! Unix Domain Socket transport
//!
//! The hub binds a socket and accepts peers; each accepted connection gets a
//! fresh [`PeerId`] plus a reader task (frames → inbound queue) and a writer task
//! (outbound queue → frames). A peer holds exactly one such connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::framing::{read_frame, write_frame};
use super::{Inbound, PeerId, Transport, TransportConfig, TransportError};
use crate::broker::Message;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct Connection {
    tx: mpsc::Sender<Message>,
    tasks: [AbortHandle; 2],
}

type Connections = Arc<Mutex<HashMap<PeerId, Connection>>>;

fn lock(connections: &Mutex<HashMap<PeerId, Connection>>) -> MutexGuard<'_, HashMap<PeerId, Connection>> {
    connections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Coordinator side: listens on a socket and fans out to connected peers
pub struct UnixHub {
    socket_path: PathBuf,
    connections: Connections,
    accept_task: AbortHandle,
}

impl UnixHub {
    /// Bind the hub socket and start accepting peers
    ///
    /// Creates the parent directory and removes a stale socket file first.
    pub fn bind(config: &TransportConfig) -> Result<(Self, mpsc::Receiver<Inbound>), TransportError> {
        let socket_path = config.socket_path.clone();
        debug!(?socket_path, "UnixHub::bind: creating socket");

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if socket_path.exists() {
            debug!(?socket_path, "UnixHub::bind: removing stale socket");
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(?socket_path, "Hub socket bound");

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));

        let accept_task = tokio::spawn(accept_loop(listener, connections.clone(), inbound_tx, config.clone()));

        let hub = Self {
            socket_path,
            connections,
            accept_task: accept_task.abort_handle(),
        };
        Ok((hub, inbound_rx))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn deliver(&self, peer: &PeerId, message: &Message) -> Result<(), TransportError> {
        let connections = lock(&self.connections);
        let connection = connections
            .get(peer)
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))?;
        try_enqueue(&connection.tx, peer, message)
    }
}

impl Drop for UnixHub {
    fn drop(&mut self) {
        self.accept_task.abort();
        for (_, connection) in lock(&self.connections).drain() {
            for task in &connection.tasks {
                task.abort();
            }
        }
        cleanup_socket(&self.socket_path);
    }
}

#[async_trait]
impl Transport for UnixHub {
    async fn send(&self, target: Option<&PeerId>, message: &Message) -> Result<(), TransportError> {
        match target {
            Some(peer) => self.deliver(peer, message),
            None => {
                let mut first_error = None;
                for peer in self.peers() {
                    if let Err(e) = self.deliver(&peer, message) {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }

    fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = lock(&self.connections).keys().cloned().collect();
        peers.sort();
        peers
    }
}

async fn accept_loop(
    listener: UnixListener,
    connections: Connections,
    inbound_tx: mpsc::Sender<Inbound>,
    config: TransportConfig,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let peer = PeerId::generate();
                info!(%peer, "Peer connected");

                let registry = connections.clone();
                let closing_peer = peer.clone();

                // registered before the reader can deliver anything that needs a reply
                let mut live = lock(&connections);
                let (tx, tasks) = spawn_connection(
                    stream,
                    peer.clone(),
                    inbound_tx.clone(),
                    &config,
                    Arc::new(Notify::new()),
                    move || {
                        info!(peer = %closing_peer, "Peer disconnected");
                        lock(&registry).remove(&closing_peer);
                    },
                );
                live.insert(peer, Connection { tx, tasks });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept peer connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Peer side: one connection to the hub
pub struct UnixPeer {
    tx: mpsc::Sender<Message>,
    tasks: [AbortHandle; 2],
    flushed: Arc<Notify>,
}

impl UnixPeer {
    /// Connect to the hub socket
    pub async fn connect(config: &TransportConfig) -> Result<(Self, mpsc::Receiver<Inbound>), TransportError> {
        debug!(socket_path = ?config.socket_path, "UnixPeer::connect: called");
        let stream = UnixStream::connect(&config.socket_path).await?;

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let flushed = Arc::new(Notify::new());
        let (tx, tasks) = spawn_connection(
            stream,
            PeerId::coordinator(),
            inbound_tx,
            config,
            flushed.clone(),
            || info!("Hub connection closed"),
        );

        Ok((Self { tx, tasks, flushed }, inbound_rx))
    }

    /// Notified once every queued outbound message has been written
    ///
    /// The writer drains after the peer is dropped, so take this before handing
    /// the peer to a broker.
    pub fn flushed(&self) -> Arc<Notify> {
        self.flushed.clone()
    }
}

impl Drop for UnixPeer {
    fn drop(&mut self) {
        // reader only; the writer exits on its own once the queue drains
        self.tasks[0].abort();
    }
}

#[async_trait]
impl Transport for UnixPeer {
    async fn send(&self, _target: Option<&PeerId>, message: &Message) -> Result<(), TransportError> {
        try_enqueue(&self.tx, &PeerId::coordinator(), message)
    }

    fn peers(&self) -> Vec<PeerId> {
        if self.tx.is_closed() {
            Vec::new()
        } else {
            vec![PeerId::coordinator()]
        }
    }
}

fn try_enqueue(tx: &mpsc::Sender<Message>, peer: &PeerId, message: &Message) -> Result<(), TransportError> {
    tx.try_send(message.clone()).map_err(|e| match e {
        TrySendError::Full(_) => TransportError::Full(peer.clone()),
        TrySendError::Closed(_) => TransportError::Closed(peer.clone()),
    })
}

/// Spawn reader and writer tasks for one stream; returns the outbound queue and
/// the tasks' abort handles as `[reader, writer]`
fn spawn_connection(
    stream: UnixStream,
    peer: PeerId,
    inbound_tx: mpsc::Sender<Inbound>,
    config: &TransportConfig,
    flushed: Arc<Notify>,
    on_close: impl FnOnce() + Send + 'static,
) -> (mpsc::Sender<Message>, [AbortHandle; 2]) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Message>(config.outbound_buffer);
    let max_size = config.max_message_size;

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &message, max_size).await {
                warn!(peer = %writer_peer, error = %e, "Failed to write frame");
                if e.is_disconnect() {
                    break;
                }
            }
        }
        debug!(peer = %writer_peer, "writer: outbound queue drained");
        flushed.notify_one();
    });

    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader, max_size).await {
                Ok(Some(message)) => {
                    let inbound = Inbound {
                        message,
                        from: peer.clone(),
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        debug!(%peer, "reader: inbound queue closed");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_disconnect() => {
                    warn!(%peer, error = %e, "Connection read failed");
                    break;
                }
                Err(e) => warn!(%peer, error = %e, "Skipping bad frame"),
            }
        }
        on_close();
    });

    (tx, [reader.abort_handle(), writer.abort_handle()])
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}
