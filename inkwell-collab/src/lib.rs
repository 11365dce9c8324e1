//! # inkwell-collab — Real-time collaboration layer for Inkwell
//!
//! Serves live documents over WebSocket: one shared replica per document,
//! JSON messages in and out, text written back to durable storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer       │
//! │ (per user)  │     JSON frames     │ (central)        │
//! └──────┬──────┘                     └────────┬─────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌──────────────────┐      ┌──────────────┐
//! │ Replica     │                     │ SessionRegistry  │ ───► │ Persistence  │
//! │ (local RGA) │                     │  └─ Session      │      │ Coordinator  │
//! └─────────────┘                     │     ├─ engine    │      └──────┬───────┘
//!                                     │     └─ Broadcast │             ▼
//!                                     └──────────────────┘      dyn TextStore
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages tagged by `type`
//! - [`presence`] — online users, cursor colors
//! - [`broadcast`] — per-peer bounded fan-out with eviction
//! - [`session`] — live sessions and the per-document registry
//! - [`persistence`] — dirty tracking, periodic and forced flushes
//! - [`storage`] — RocksDB and in-memory text stores
//! - [`auth`] — handshake credential check
//! - [`server`] — WebSocket sync server
//! - [`client`] — reconnecting sync client with offline queue
//!
//! ## Performance Targets
//!
//! | Metric | Target |
//! |--------|--------|
//! | Encode one `crdt_ops` frame (16 ops) | <10µs |
//! | Broadcast 1K frames × 100 peers | <10ms |
//! | Flush 100KB document | <5ms |

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use auth::{AuthError, CredentialCheck, Identity, StaticTokens};
pub use broadcast::{BroadcastGroup, BroadcastStats, PeerHandle, PeerInbox};
pub use client::{
    backoff_delay, ClientConfig, ClientError, ConnectionEvent, ConnectionState, LocalDraft,
    OfflineQueue, Rebase, ReconnectPolicy, Replica, SyncClient, SyncEvent,
};
pub use persistence::{FlushConfig, FlushOutcome, FlushStats, PersistenceCoordinator};
pub use presence::{color_for, CursorRange, OnlineUser, PresenceAction};
pub use protocol::{
    ClientMessage, ClientOp, ConnectionId, DocumentId, ProtocolError, ServerMessage, TextEdit,
    UserId,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{LeaveOutcome, Session, SessionConfig, SessionError, SessionRegistry};
pub use storage::{
    DocumentMetadata, MemoryStore, RocksStore, StoreConfig, StoreError, StoredText, TextStore,
};
