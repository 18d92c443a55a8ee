//! TCP front door: accepts connections and hands each to its own task.
//!
//! ```text
//! TcpListener ── accept ──► tokio::spawn(handle_connection)
//!                                 │
//!                                 ▼
//!                     Coordinator (one per server)
//! ```
//!
//! The server owns no sketch state itself. It wires every accepted stream
//! to the shared [`Coordinator`] and keeps connection counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::connection::{handle_connection, ConnectionError};
use crate::coordinator::{Coordinator, SharedCoordinator};
use crate::protocol::PeerInfo;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Lines a connection may fall behind before it is dropped
    /// (zero is treated as one)
    pub broadcast_capacity: usize,
    /// Longest accepted inbound line, excluding the terminator
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4242".to_string(),
            broadcast_capacity: 1024,
            max_line_bytes: 64 * 1024,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub edits_applied: u64,
    pub edits_dropped: u64,
    pub lagged_disconnects: u64,
}

/// Live counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    edits_applied: AtomicU64,
    edits_dropped: AtomicU64,
    lagged_disconnects: AtomicU64,
}

impl ServerCounters {
    pub(crate) fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn edit_applied(&self) {
        self.edits_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn edit_dropped(&self) {
        self.edits_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lagged_disconnect(&self) {
        self.lagged_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            edits_applied: self.edits_applied.load(Ordering::Relaxed),
            edits_dropped: self.edits_dropped.load(Ordering::Relaxed),
            lagged_disconnects: self.lagged_disconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// The sketch server.
pub struct SketchServer {
    config: ServerConfig,
    coordinator: SharedCoordinator,
    counters: Arc<ServerCounters>,
}

impl SketchServer {
    /// Create a server with an empty sketch.
    pub fn new(config: ServerConfig) -> Self {
        let coordinator = Arc::new(Coordinator::new(config.broadcast_capacity));
        Self {
            config,
            coordinator,
            counters: Arc::new(ServerCounters::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until accepting fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        log::info!("Sketch server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await.map_err(ServerError::Accept)?;
            log::debug!("New TCP connection from {addr}");
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("Could not disable Nagle for {addr}: {e}");
            }

            let coordinator = self.coordinator.clone();
            let counters = self.counters.clone();
            let max_line_bytes = self.config.max_line_bytes;

            tokio::spawn(async move {
                let info = PeerInfo::new(addr);
                match handle_connection(stream, info, coordinator, counters, max_line_bytes).await {
                    Ok(()) => {}
                    Err(ConnectionError::Lagged(n)) => {
                        log::warn!("Dropped {addr}: {n} lines behind, client must resync");
                    }
                    Err(e) => log::error!("Connection error from {addr}: {e}"),
                }
            });
        }
    }

    /// Get server statistics.
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn coordinator(&self) -> &SharedCoordinator {
        &self.coordinator
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
