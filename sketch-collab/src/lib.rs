//! # sketch-collab: shared sketch server and replica client
//!
//! Clients send edit requests as text lines; the server applies them to the
//! one authoritative [`sketch_core::Sketch`] and broadcasts the canonical
//! result to every connection, the sender included.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    CREATE/MOVE/...   ┌──────────────┐
//! │ SketchClient │ ───────────────────► │ SketchServer │
//! │ (replica)    │ ◄─────────────────── │ (accept)     │
//! └──────────────┘    ADD/MOVE/...      └──────┬───────┘
//!                                              │ one task per connection
//!                                              ▼
//!                                      ┌──────────────┐
//!                                      │ Coordinator  │
//!                                      │ Sketch +     │
//!                                      │ BroadcastGrp │
//!                                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Line grammar for requests and server messages
//! - [`broadcast`]: Fan-out with bounded per-peer buffers
//! - [`coordinator`]: Single critical section for apply, register and snapshot
//! - [`connection`]: Per-connection read and write loops
//! - [`server`]: TCP accept loop, configuration and counters
//! - [`client`]: Replica client

pub mod protocol;
pub mod broadcast;
pub mod coordinator;
pub mod connection;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{EditRequest, PeerInfo, ProtocolError, ServerMessage, Snapshot, Verb};
pub use broadcast::{BroadcastGroup, BroadcastStats, Line};
pub use coordinator::{Coordinator, EditError, Registration, SharedCoordinator};
pub use connection::{handle_connection, ConnectionError};
pub use server::{ServerConfig, ServerCounters, ServerError, ServerStats, SketchServer};
pub use client::{ClientError, ConnectionState, SketchClient, SyncEvent};
