//! Per-connection duplex line stream.
//!
//! Two loops share one connection:
//! - inbound: read `\n`-terminated lines and hand each non-empty one to the
//!   coordinator;
//! - outbound: write the registration snapshot, then every broadcast line.
//!
//! Whichever loop ends first ends the connection. The peer is then removed
//! from the coordinator; other peers are not told.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use thiserror::Error;

use crate::broadcast::Line;
use crate::coordinator::{Coordinator, SharedCoordinator};
use crate::protocol::{PeerInfo, Snapshot};
use crate::server::ServerCounters;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("fell {0} lines behind the broadcast stream")]
    Lagged(u64),
}

/// Serve one connection until it ends.
pub async fn handle_connection<S>(
    stream: S,
    info: PeerInfo,
    coordinator: SharedCoordinator,
    counters: Arc<ServerCounters>,
    max_line_bytes: usize,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer_id = info.peer_id;
    let addr = info.addr;
    let (read_half, write_half) = tokio::io::split(stream);

    counters.connection_opened();
    let registration = coordinator.register(info).await;
    log::info!(
        "Peer {peer_id} connected from {addr} ({} shapes in snapshot)",
        registration.snapshot.len()
    );

    let result = tokio::select! {
        r = read_edits(read_half, &coordinator, &counters, max_line_bytes) => r,
        r = write_lines(write_half, registration.snapshot, registration.receiver) => r,
    };

    coordinator.unregister(&peer_id).await;
    counters.connection_closed();
    if let Err(ConnectionError::Lagged(_)) = &result {
        counters.lagged_disconnect();
    }
    log::info!("Peer {peer_id} ({addr}) disconnected");
    result
}

async fn read_edits<R>(
    reader: R,
    coordinator: &Coordinator,
    counters: &ServerCounters,
    max_line_bytes: usize,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // One extra byte so a line of exactly max_line_bytes still fits its '\n'.
    let limit = max_line_bytes as u64 + 1;

    loop {
        buf.clear();
        let n = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if buf.last() != Some(&b'\n') && n as u64 >= limit {
            return Err(ConnectionError::LineTooLong { limit: max_line_bytes });
        }

        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                counters.edit_dropped();
                log::warn!("Dropped edit {:?}: {e}", String::from_utf8_lossy(raw));
                continue;
            }
        };
        match coordinator.apply_edit(line).await {
            Ok(_) => counters.edit_applied(),
            Err(e) => {
                counters.edit_dropped();
                log::warn!("Dropped edit {line:?}: {e}");
            }
        }
    }
}

async fn write_lines<W>(
    writer: W,
    snapshot: Snapshot,
    mut receiver: broadcast::Receiver<Line>,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    if !snapshot.is_empty() {
        writer.write_all(snapshot.to_wire().as_bytes()).await?;
        writer.flush().await?;
    }

    loop {
        match receiver.recv().await {
            Ok(line) => {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                // Batch whatever else is already queued before flushing.
                loop {
                    match receiver.try_recv() {
                        Ok(line) => {
                            writer.write_all(line.as_bytes()).await?;
                            writer.write_all(b"\n").await?;
                        }
                        Err(TryRecvError::Lagged(n)) => return Err(ConnectionError::Lagged(n)),
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
                writer.flush().await?;
            }
            Err(RecvError::Lagged(n)) => return Err(ConnectionError::Lagged(n)),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
