//! The authoritative sketch and the connection registry behind one lock.
//!
//! ```text
//! Connection A ──┐  apply_edit(line)   ┌──────────────────────────┐
//! Connection B ──┼───────────────────► │ Mutex<CoordinatorState>  │
//! Connection C ──┘                     │   Sketch (truth)         │
//!                                      │   BroadcastGroup         │
//!                                      └────────────┬─────────────┘
//!                                                   │ canonical line
//!                          ┌────────────────────────┼────────────────┐
//!                          ▼                        ▼                ▼
//!                     receiver A               receiver B       receiver C
//! ```
//!
//! Every state transition (register, unregister, apply, broadcast) holds
//! the same mutex, so edits are totally ordered by arrival and every
//! connection observes the same line order. The mutex is never held across
//! socket I/O: broadcasting only enqueues.

use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use thiserror::Error;
use uuid::Uuid;

use sketch_core::{ShapeId, Sketch, SketchError};

use crate::broadcast::{BroadcastGroup, BroadcastStats, Line};
use crate::protocol::{EditRequest, PeerInfo, ProtocolError, ServerMessage, Snapshot, Verb};

/// Why an edit was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("malformed edit: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("{verb} targets missing shape {id}")]
    StaleReference { verb: Verb, id: ShapeId },
    #[error(transparent)]
    Sketch(#[from] SketchError),
}

/// What a new connection gets from [`Coordinator::register`].
pub struct Registration {
    /// Every line broadcast after the snapshot was taken
    pub receiver: broadcast::Receiver<Line>,
    /// The sketch at the instant of registration
    pub snapshot: Snapshot,
}

struct CoordinatorState {
    sketch: Sketch,
    group: BroadcastGroup,
}

impl CoordinatorState {
    /// Mutate the sketch for `request` and return the line to broadcast.
    fn apply(&mut self, request: EditRequest) -> Result<ServerMessage, EditError> {
        match request {
            EditRequest::Create(shape) => {
                let id = self.sketch.create_with_new_id(shape.clone())?;
                Ok(ServerMessage::Add { id, shape })
            }
            EditRequest::Delete(id) => {
                // Deletes are idempotent and always forwarded.
                self.sketch.delete(id);
                Ok(ServerMessage::Delete(id))
            }
            EditRequest::Move { id, dx, dy } => {
                let shape = self
                    .sketch
                    .get_mut(id)
                    .ok_or(EditError::StaleReference { verb: Verb::Move, id })?;
                shape.translate(dx, dy);
                Ok(ServerMessage::Move { id, dx, dy })
            }
            EditRequest::Recolor { id, color } => {
                let shape = self
                    .sketch
                    .get_mut(id)
                    .ok_or(EditError::StaleReference { verb: Verb::Recolor, id })?;
                shape.set_color(color);
                Ok(ServerMessage::Recolor { id, color })
            }
        }
    }
}

/// Single source of truth for the shared sketch.
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    /// `broadcast_capacity` is the number of lines a connection may fall
    /// behind before it is disconnected.
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                sketch: Sketch::new(),
                group: BroadcastGroup::new(broadcast_capacity),
            }),
        }
    }

    /// Join the broadcast group and capture the current snapshot in one
    /// step. No edit can land between the two, so the snapshot plus the
    /// receiver's lines is exactly the sketch's history from here on.
    pub async fn register(&self, info: PeerInfo) -> Registration {
        let mut state = self.state.lock().await;
        let snapshot = Snapshot::of(&state.sketch);
        log::debug!(
            "Registering peer {} ({}) with {} shapes",
            info.peer_id,
            info.addr,
            snapshot.len()
        );
        let receiver = state.group.add_peer(info);
        Registration { receiver, snapshot }
    }

    /// Leave the broadcast group. Idempotent.
    pub async fn unregister(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.state.lock().await.group.remove_peer(peer_id)
    }

    /// Decode, validate and apply one raw client line.
    ///
    /// On success the canonical line has already been broadcast to every
    /// registered connection and is returned. On error nothing changed and
    /// nothing was sent.
    pub async fn apply_edit(&self, raw: &str) -> Result<Line, EditError> {
        let request = EditRequest::parse(raw)?;
        let mut state = self.state.lock().await;
        let message = state.apply(request)?;
        let line = Line::from(message.to_string());
        let receivers = state.group.broadcast(line.clone());
        log::debug!("Applied {line:?} -> {receivers} receivers");
        Ok(line)
    }

    /// Send `line` to every registered connection.
    pub async fn broadcast(&self, line: Line) -> usize {
        self.state.lock().await.group.broadcast(line)
    }

    pub async fn snapshot(&self) -> Snapshot {
        Snapshot::of(&self.state.lock().await.sketch)
    }

    /// A copy of the authoritative sketch.
    pub async fn sketch(&self) -> Sketch {
        self.state.lock().await.sketch.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.group.peer_count()
    }

    pub async fn broadcast_stats(&self) -> BroadcastStats {
        self.state.lock().await.group.stats()
    }
}

/// Shared handle used by the accept loop and every connection task.
pub type SharedCoordinator = Arc<Coordinator>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer() -> PeerInfo {
        let addr: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        PeerInfo::new(addr)
    }

    fn drain(rx: &mut broadcast::Receiver<Line>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.to_string());
        }
        lines
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_rewrites_line() {
        let coordinator = Coordinator::new(64);
        let mut reg = coordinator.register(peer()).await;
        assert!(reg.snapshot.is_empty());

        let line = coordinator
            .apply_edit("CREATE ellipse |10 10 50 50 -16777216|")
            .await
            .unwrap();
        assert_eq!(&*line, "ADD 1 ellipse |10 10 50 50 -16777216|");

        let line = coordinator
            .apply_edit("CREATE rectangle |9 9 1 1 5|")
            .await
            .unwrap();
        assert_eq!(&*line, "ADD 2 rectangle |1 1 9 9 5|");

        assert_eq!(
            drain(&mut reg.receiver),
            vec![
                "ADD 1 ellipse |10 10 50 50 -16777216|",
                "ADD 2 rectangle |1 1 9 9 5|",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_id_still_broadcasts() {
        let coordinator = Coordinator::new(64);
        let mut reg = coordinator.register(peer()).await;
        coordinator.apply_edit("CREATE segment |0 0 5 5 1|").await.unwrap();
        let before = coordinator.sketch().await;

        let line = coordinator.apply_edit("DELETE 99").await.unwrap();
        assert_eq!(&*line, "DELETE 99");
        assert_eq!(coordinator.sketch().await, before);
        assert_eq!(drain(&mut reg.receiver).last().unwrap(), "DELETE 99");
    }

    #[tokio::test]
    async fn test_move_and_recolor_of_missing_id_are_dropped() {
        let coordinator = Coordinator::new(64);
        let mut reg = coordinator.register(peer()).await;

        let err = coordinator.apply_edit("MOVE 1 1 1").await.unwrap_err();
        assert_eq!(
            err,
            EditError::StaleReference { verb: Verb::Move, id: ShapeId::new(1).unwrap() }
        );
        let err = coordinator.apply_edit("RECOLOR 1 255").await.unwrap_err();
        assert!(matches!(err, EditError::StaleReference { verb: Verb::Recolor, .. }));

        assert!(drain(&mut reg.receiver).is_empty());
        assert!(coordinator.sketch().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_edits_are_dropped() {
        let coordinator = Coordinator::new(64);
        let mut reg = coordinator.register(peer()).await;

        for raw in [
            "CREATE ellipse |1 2 3|",
            "CREATE blob |1 2 3 4 5|",
            "ADD 1 ellipse |1 2 3 4 5|",
            "MOVE one 2 3",
            "JUMP 1",
            "",
        ] {
            assert!(
                matches!(coordinator.apply_edit(raw).await, Err(EditError::Protocol(_))),
                "{raw:?} should be rejected"
            );
        }
        assert!(drain(&mut reg.receiver).is_empty());
        assert!(coordinator.sketch().await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_id_is_not_reused() {
        let coordinator = Coordinator::new(64);
        coordinator.apply_edit("CREATE segment |0 0 1 1 0|").await.unwrap();
        coordinator.apply_edit("DELETE 1").await.unwrap();
        let line = coordinator.apply_edit("CREATE segment |0 0 1 1 0|").await.unwrap();
        assert_eq!(&*line, "ADD 2 segment |0 0 1 1 0|");
    }

    #[tokio::test]
    async fn test_register_snapshot_is_atomic_with_edits() {
        let coordinator = Coordinator::new(64);
        coordinator.apply_edit("CREATE ellipse |10 10 50 50 -16777216|").await.unwrap();

        let mut reg = coordinator.register(peer()).await;
        assert_eq!(
            reg.snapshot.lines(),
            &["ADD 1 ellipse |10 10 50 50 -16777216|".to_string()]
        );
        // Nothing from before registration is replayed on the receiver
        assert!(drain(&mut reg.receiver).is_empty());

        coordinator.apply_edit("MOVE 1 5 5").await.unwrap();
        assert_eq!(drain(&mut reg.receiver), vec!["MOVE 1 5 5"]);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let coordinator = Coordinator::new(64);
        let info = peer();
        let peer_id = info.peer_id;
        let _reg = coordinator.register(info).await;
        assert_eq!(coordinator.peer_count().await, 1);

        assert!(coordinator.unregister(&peer_id).await.is_some());
        assert!(coordinator.unregister(&peer_id).await.is_none());
        assert_eq!(coordinator.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let coordinator = Coordinator::new(64);
        let mut a = coordinator.register(peer()).await;
        let mut b = coordinator.register(peer()).await;

        assert_eq!(coordinator.broadcast(Line::from("DELETE 4")).await, 2);
        assert_eq!(drain(&mut a.receiver), vec!["DELETE 4"]);
        assert_eq!(drain(&mut b.receiver), vec!["DELETE 4"]);
        assert_eq!(coordinator.broadcast_stats().await.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_replica_converges_at_every_step() {
        let coordinator = Coordinator::new(256);
        let mut early = coordinator.register(peer()).await;
        let mut replica = Sketch::new();

        let edits = [
            "CREATE ellipse |10 10 50 50 -16777216|",
            "CREATE polyline |0 0 5 5 10 0 7|",
            "MOVE 1 5 5",
            "RECOLOR 2 -256",
            "DELETE 1",
            "MOVE 1 1 1",
            "CREATE rectangle |3 3 0 0 1|",
            "DELETE 8",
        ];
        let mut late = None;
        for (i, edit) in edits.iter().enumerate() {
            let _ = coordinator.apply_edit(edit).await;
            for line in drain(&mut early.receiver) {
                ServerMessage::parse(&line).unwrap().apply_to(&mut replica);
            }
            assert!(replica.same_shapes(&coordinator.sketch().await), "diverged after {edit:?}");
            if i == 3 {
                late = Some(coordinator.register(peer()).await);
            }
        }

        // A mid-stream joiner converges from snapshot + subsequent lines
        let mut late = late.unwrap();
        let mut late_replica = Sketch::new();
        for line in late.snapshot.lines().iter().cloned().chain(drain(&mut late.receiver)) {
            ServerMessage::parse(&line).unwrap().apply_to(&mut late_replica);
        }
        assert!(late_replica.same_shapes(&coordinator.sketch().await));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_unique_dense_ids() {
        let coordinator = Arc::new(Coordinator::new(1024));
        let mut handles = Vec::new();
        for task in 0..8 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..25 {
                    let line = coordinator
                        .apply_edit(&format!("CREATE segment |{task} {i} 0 0 1|"))
                        .await
                        .unwrap();
                    match ServerMessage::parse(&line).unwrap() {
                        ServerMessage::Add { id, .. } => ids.push(id.get()),
                        other => panic!("unexpected {other:?}"),
                    }
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (1..=200).collect::<Vec<u32>>());
    }
}
