//! Replica client for the sketch server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Edit requests as typed helpers or raw lines
//! - A local [`Sketch`] replica fed by the server's canonical stream
//!
//! The replica is rebuilt from scratch on every connect: the server opens
//! each connection with a full snapshot, so nothing from an earlier session
//! is kept. Each connect bumps a generation counter; a reader task from an
//! older connection stops touching the replica, the state and the event
//! channel as soon as the counter moves past it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use sketch_core::{Color, Shape, ShapeId, Sketch};

use crate::protocol::{EditRequest, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
///
/// Events are advisory. If the application stops draining them they are
/// dropped; [`SketchClient::replica`] is always current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// A server line was applied to the replica
    Applied(ServerMessage),
    /// The server sent a line that could not be decoded
    Malformed(String),
    /// Connection lost
    Disconnected,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not connected")]
    NotConnected,
}

/// The replica client.
pub struct SketchClient {
    /// Server address, `host:port`
    addr: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Local copy of the server's sketch
    replica: Arc<RwLock<Sketch>>,

    /// Bumped on every connect, under the replica lock
    generation: Arc<AtomicU64>,

    /// Reader task of the current connection
    reader: Option<JoinHandle<()>>,

    /// Channel to the socket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SketchClient {
    pub fn new(addr: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            addr: addr.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            replica: Arc::new(RwLock::new(Sketch::new())),
            generation: Arc::new(AtomicU64::new(0)),
            reader: None,
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns a writer task for outgoing requests and a reader task that
    /// applies every server line to the replica.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let stream = match TcpStream::connect(&self.addr).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        if let Some(previous) = self.reader.take() {
            previous.abort();
        }
        let my_generation = {
            let mut replica = self.replica.write().await;
            *replica = Sketch::new();
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        // Writer task: forward outgoing lines to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(mut line) = out_rx.recv().await {
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    log::debug!("Client write failed: {e}");
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, SyncEvent::Connected);

        // Reader task: apply server lines to the replica
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let replica = self.replica.clone();
        let generation = self.generation.clone();
        let current = move || generation.load(Ordering::Acquire) == my_generation;
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("Client read failed: {e}");
                        break;
                    }
                };
                match ServerMessage::parse(&line) {
                    Ok(message) => {
                        {
                            let mut replica = replica.write().await;
                            if !current() {
                                return;
                            }
                            message.apply_to(&mut replica);
                        }
                        emit(&event_tx, SyncEvent::Applied(message));
                    }
                    Err(e) => {
                        if !current() {
                            return;
                        }
                        log::warn!("Ignoring server line {line:?}: {e}");
                        emit(&event_tx, SyncEvent::Malformed(line));
                    }
                }
            }

            let mut state = state.write().await;
            if current() {
                *state = ConnectionState::Disconnected;
                emit(&event_tx, SyncEvent::Disconnected);
            }
        }));

        log::info!("Connected to sketch server at {}", self.addr);
        Ok(())
    }

    /// Stop sending. The server closes its side once it sees EOF, which
    /// ends the reader task.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn send_create(&self, shape: &Shape) -> Result<(), ClientError> {
        self.send_request(EditRequest::Create(shape.clone())).await
    }

    pub async fn send_delete(&self, id: ShapeId) -> Result<(), ClientError> {
        self.send_request(EditRequest::Delete(id)).await
    }

    pub async fn send_move(&self, id: ShapeId, dx: i32, dy: i32) -> Result<(), ClientError> {
        self.send_request(EditRequest::Move { id, dx, dy }).await
    }

    pub async fn send_recolor(&self, id: ShapeId, color: Color) -> Result<(), ClientError> {
        self.send_request(EditRequest::Recolor { id, color }).await
    }

    async fn send_request(&self, request: EditRequest) -> Result<(), ClientError> {
        self.send_raw(request.to_string()).await
    }

    /// Send one line as-is. The terminator is appended.
    pub async fn send_raw(&self, line: impl Into<String>) -> Result<(), ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(line.into())
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// A copy of the local replica.
    pub async fn replica(&self) -> Sketch {
        self.replica.read().await.clone()
    }

    /// The topmost replica shape under `(x, y)`.
    pub async fn topmost_at(&self, x: i32, y: i32) -> Option<ShapeId> {
        self.replica.read().await.topmost_at(x, y)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

fn emit(tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        log::trace!("Event queue full, dropping {event:?}");
    }
}
