//! Fan-out of canonical lines to every registered connection.
//!
//! Uses a tokio broadcast channel: one `send` reaches every subscriber, and
//! each connection drains its own bounded receiver. The sender never waits
//! on a slow peer. A receiver that falls more than `capacity` lines behind
//! loses the oldest lines and observes `RecvError::Lagged`; the connection
//! handler treats that as fatal and disconnects, so the client resyncs from
//! a fresh snapshot on reconnect.
//!
//! The group itself has no lock. It lives inside the coordinator's critical
//! section, which is what orders registration against broadcasts.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::PeerInfo;

/// One canonical line, shared by every receiver.
pub type Line = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// The registry of live connections plus their shared outbound channel.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Line>,

    /// Connected peers, keyed by peer id
    peers: HashMap<Uuid, PeerInfo>,

    messages_sent: u64,
}

impl BroadcastGroup {
    /// Create a new broadcast group buffering `capacity` lines per
    /// receiver. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: HashMap::new(),
            messages_sent: 0,
        }
    }

    /// Add a peer. The returned receiver sees every line broadcast after
    /// this call, and none before it.
    pub fn add_peer(&mut self, info: PeerInfo) -> broadcast::Receiver<Line> {
        self.peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    /// Remove a peer. Removing an unknown peer is a no-op.
    pub fn remove_peer(&mut self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.peers.remove(peer_id)
    }

    /// Send a line to every receiver, the originator's included.
    ///
    /// Returns the number of receivers that will see it.
    pub fn broadcast(&mut self, line: Line) -> usize {
        let count = self.sender.send(line).unwrap_or(0);
        self.messages_sent += 1;
        count
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            active_peers: self.peers.len(),
        }
    }
}
