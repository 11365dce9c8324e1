//! Live document sessions and the registry that owns them.
//!
//! ```text
//! SessionRegistry
//!   slots: Mutex<HashMap<DocumentId, Arc<AsyncMutex<SlotState>>>>
//!                                        │
//!            Vacant ── join (load) ──► Live(Arc<Session>) ── last leave + flush ──► Retired
//!                                        │
//!                         Session { engine: Mutex<DocumentEngine>, peers: BroadcastGroup }
//! ```
//!
//! Each document has one slot lock. Join, leave and idle eviction all take
//! it, so creation and teardown of a session never interleave: a joiner
//! that finds a `Retired` slot starts over with a fresh one, and the fresh
//! session is loaded only after the retiring session's final flush.
//!
//! The engine lock is a plain `Mutex` and is never held across an await.
//! Broadcasts happen while it is held, so every peer receives batches in
//! the order they were applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use inkwell_core::{ActorId, DocumentEngine, EngineConfig, NodeRecord, Operation};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::broadcast::{BroadcastGroup, PeerHandle};
use crate::persistence::PersistenceCoordinator;
use crate::presence::OnlineUser;
use crate::protocol::{ClientOp, ConnectionId, ContentPayload, DocumentId, ServerMessage, TextEdit, UserId};
use crate::storage::{StoreError, StoredText, TextStore};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue capacity per connection.
    pub peer_queue_capacity: usize,
    /// Create unknown documents on first join instead of refusing them.
    pub create_missing_documents: bool,
    pub engine: EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer_queue_capacity: 256,
            create_missing_documents: false,
            engine: EngineConfig::default(),
        }
    }
}

/// What a new connection needs to start editing.
#[derive(Debug, Clone)]
pub struct InitState {
    pub content: String,
    pub version: u64,
    pub epoch: u64,
    pub nodes: Vec<NodeRecord>,
    pub online: Vec<OnlineUser>,
}

/// Result of one inbound batch or snapshot.
#[derive(Debug, Default)]
pub struct EditOutcome {
    pub applied: Vec<Operation>,
    pub version: u64,
    /// Human-readable reasons for operations that were refused.
    pub rejected: Vec<String>,
}

/// One live document: its replica, its connections, its flush watermark.
pub struct Session {
    document_id: DocumentId,
    engine: Mutex<DocumentEngine>,
    peers: BroadcastGroup,
    persisted_version: AtomicU64,
}

impl Session {
    pub fn new(document_id: DocumentId, stored: StoredText, config: &SessionConfig) -> Self {
        Self {
            document_id,
            engine: Mutex::new(DocumentEngine::from_text(
                &stored.content,
                stored.version,
                config.engine.clone(),
            )),
            peers: BroadcastGroup::new(config.peer_queue_capacity),
            persisted_version: AtomicU64::new(stored.version),
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Lock the replica. Never hold the guard across an await.
    pub fn lock_engine(&self) -> MutexGuard<'_, DocumentEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peers(&self) -> &BroadcastGroup {
        &self.peers
    }

    pub fn version(&self) -> u64 {
        self.lock_engine().version()
    }

    pub fn content(&self) -> String {
        self.lock_engine().materialize().to_string()
    }

    pub fn persisted_version(&self) -> u64 {
        self.persisted_version.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.version() > self.persisted_version()
    }

    /// Record a successful write. Never moves the watermark backwards.
    pub fn mark_persisted(&self, version: u64) {
        self.persisted_version.fetch_max(version, Ordering::SeqCst);
    }

    /// Text and version to write, or `None` when nothing changed since the
    /// last successful flush.
    pub fn flush_snapshot(&self) -> Option<(String, u64)> {
        let engine = self.lock_engine();
        (engine.version() > self.persisted_version())
            .then(|| (engine.materialize().to_string(), engine.version()))
    }

    pub fn connection_count(&self) -> usize {
        self.peers.peer_count()
    }

    /// Add a connection and capture its initial state in one step, so no
    /// batch can land between the snapshot and the first broadcast it
    /// receives.
    pub fn attach(&self, peer: PeerHandle) -> InitState {
        let engine = self.lock_engine();
        self.peers.add_peer(peer);
        InitState {
            content: engine.materialize().to_string(),
            version: engine.version(),
            epoch: engine.epoch(),
            nodes: engine.snapshot(),
            online: self.peers.peers(),
        }
    }

    pub fn detach(&self, connection_id: &ConnectionId) -> Option<OnlineUser> {
        self.peers.remove_peer(connection_id)
    }

    /// Drop tombstones while no connection holds node ids from this
    /// replica. Checked under the engine lock, which `attach` also takes.
    pub fn compact_if_idle(&self) -> usize {
        let mut engine = self.lock_engine();
        if self.peers.peer_count() > 0 {
            return 0;
        }
        let removed = engine.compact();
        if removed > 0 {
            log::debug!(
                "document {}: compacted {removed} tombstones at version {}",
                self.document_id,
                engine.version()
            );
        }
        removed
    }

    /// Apply a `crdt_ops` batch and relay what changed to the other peers.
    ///
    /// Node operations must be minted by an actor owned by `user_id`.
    /// Positional edits are clamped to the current text.
    pub fn apply_client_ops(
        &self,
        actor: &ActorId,
        user_id: UserId,
        ops: Vec<ClientOp>,
        sender: ConnectionId,
    ) -> EditOutcome {
        let mut engine = self.lock_engine();
        let mut outcome = EditOutcome::default();

        for op in ops {
            match op {
                ClientOp::Node(op) => {
                    if op.actor().owner() != Some(user_id) {
                        outcome.rejected.push(format!(
                            "operation by {} does not belong to user {user_id}",
                            op.actor()
                        ));
                        continue;
                    }
                    let batch = engine.apply_remote_batch([op]);
                    outcome.applied.extend(batch.applied);
                    outcome
                        .rejected
                        .extend(batch.rejected.into_iter().map(|(_, e)| e.to_string()));
                }
                ClientOp::Edit(edit) => match apply_edit(&mut engine, actor, &edit) {
                    Ok(ops) => outcome.applied.extend(ops),
                    Err(e) => outcome.rejected.push(e.to_string()),
                },
            }
        }

        outcome.version = engine.version();
        if !outcome.applied.is_empty() {
            let msg = ServerMessage::CrdtOps {
                delta: engine.to_delta(&outcome.applied),
                ops: outcome.applied.clone(),
                version: outcome.version,
                user_id,
            };
            if let Err(e) = self.peers.broadcast(&msg, Some(sender)) {
                log::error!("document {}: failed to relay batch: {e}", self.document_id);
            }
        }
        outcome
    }

    /// Reconcile a full-content snapshot and relay it to the other peers.
    pub fn apply_snapshot(
        &self,
        actor: &ActorId,
        user_id: UserId,
        text: &str,
        sender: ConnectionId,
    ) -> EditOutcome {
        let mut engine = self.lock_engine();
        let mut outcome = EditOutcome::default();
        match engine.replace_text(actor, text) {
            Ok(ops) => outcome.applied = ops,
            Err(e) => outcome.rejected.push(e.to_string()),
        }
        outcome.version = engine.version();

        if !outcome.applied.is_empty() {
            let msg = ServerMessage::ContentUpdate {
                payload: ContentPayload {
                    html: engine.materialize().to_string(),
                },
                user_id,
                version: outcome.version,
                ops: outcome.applied.clone(),
            };
            if let Err(e) = self.peers.broadcast(&msg, Some(sender)) {
                log::error!("document {}: failed to relay snapshot: {e}", self.document_id);
            }
        }
        outcome
    }
}

fn apply_edit(
    engine: &mut DocumentEngine,
    actor: &ActorId,
    edit: &TextEdit,
) -> Result<Vec<Operation>, inkwell_core::EngineError> {
    let len = engine.len();
    match edit {
        TextEdit::Insert { position, text } => engine.insert_text(actor, (*position).min(len), text),
        TextEdit::Delete { position, length } => {
            let position = (*position).min(len);
            engine.delete_range(actor, position, (*length).min(len - position))
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────────────

enum SlotState {
    Vacant,
    Live(Arc<Session>),
    Retired,
}

type Slot = Arc<AsyncMutex<SlotState>>;

/// A successful join.
pub struct Joined {
    pub session: Arc<Session>,
    pub init: InitState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// No live session held this connection.
    NotJoined,
    /// Other connections remain.
    Remaining(usize),
    /// Last connection left; the session was flushed and closed.
    Closed,
    /// Last connection left but the flush failed; the session stays for
    /// the periodic flusher to retry.
    KeptDirty,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub live_sessions: usize,
}

/// At most one [`Session`] per document.
pub struct SessionRegistry {
    slots: Mutex<HashMap<DocumentId, Slot>>,
    store: Arc<dyn TextStore>,
    persistence: PersistenceCoordinator,
    config: SessionConfig,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn TextStore>, config: SessionConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            persistence: PersistenceCoordinator::new(store.clone()),
            store,
            config,
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attach `peer` to the document's session, loading it if needed.
    pub async fn join(&self, document_id: DocumentId, peer: PeerHandle) -> Result<Joined, SessionError> {
        loop {
            let slot = self.slot_or_insert(document_id);
            let mut state = slot.lock().await;
            if matches!(*state, SlotState::Retired) {
                // Lost a race with the last leave; take a fresh slot.
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }
            if let SlotState::Live(session) = &*state {
                let session = session.clone();
                let init = session.attach(peer);
                return Ok(Joined { session, init });
            }

            let stored = match self.load(document_id).await {
                Ok(stored) => stored,
                Err(e) => {
                    *state = SlotState::Retired;
                    self.remove_slot(document_id, &slot);
                    return Err(e);
                }
            };

            let session = Arc::new(Session::new(document_id, stored, &self.config));
            self.opened.fetch_add(1, Ordering::SeqCst);
            log::info!(
                "Opened session for document {document_id} at version {}",
                session.version()
            );
            let init = session.attach(peer);
            *state = SlotState::Live(session.clone());
            return Ok(Joined { session, init });
        }
    }

    async fn load(&self, document_id: DocumentId) -> Result<StoredText, SessionError> {
        let store = self.store.clone();
        let loaded = blocking(move || store.load_document_text(document_id)).await;
        match loaded {
            Ok(stored) => Ok(stored),
            Err(StoreError::NotFound(_)) if self.config.create_missing_documents => {
                let store = self.store.clone();
                match blocking(move || store.create_document(document_id, "")).await {
                    Ok(()) => {
                        log::info!("Created document {document_id}");
                        Ok(StoredText::default())
                    }
                    Err(StoreError::AlreadyExists(_)) => {
                        let store = self.store.clone();
                        Ok(blocking(move || store.load_document_text(document_id)).await?)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(StoreError::NotFound(_)) => Err(SessionError::DocumentNotFound(document_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Detach a connection. The last one out flushes and closes the session.
    pub async fn leave(&self, document_id: DocumentId, connection_id: ConnectionId) -> LeaveOutcome {
        let Some(slot) = self.slot(document_id) else {
            return LeaveOutcome::NotJoined;
        };
        let mut state = slot.lock().await;
        let SlotState::Live(session) = &*state else {
            return LeaveOutcome::NotJoined;
        };
        let session = session.clone();

        // The peer may already be gone if a broadcast evicted it.
        session.detach(&connection_id);
        let remaining = session.connection_count();
        if remaining > 0 {
            return LeaveOutcome::Remaining(remaining);
        }

        match self.persistence.flush(&session).await {
            Ok(_) => {
                *state = SlotState::Retired;
                self.remove_slot(document_id, &slot);
                self.closed.fetch_add(1, Ordering::SeqCst);
                log::info!("Closed session for document {document_id}");
                LeaveOutcome::Closed
            }
            Err(e) => {
                log::error!(
                    "Final flush of document {document_id} failed, keeping session: {e}"
                );
                session.compact_if_idle();
                LeaveOutcome::KeptDirty
            }
        }
    }

    /// Flush and close a session with no connections. Returns whether it
    /// was closed.
    pub async fn evict_if_idle(&self, document_id: DocumentId) -> bool {
        let Some(slot) = self.slot(document_id) else {
            return false;
        };
        let mut state = slot.lock().await;
        let SlotState::Live(session) = &*state else {
            return false;
        };
        if session.connection_count() > 0 {
            return false;
        }
        let session = session.clone();
        match self.persistence.flush(&session).await {
            Ok(_) => {
                *state = SlotState::Retired;
                self.remove_slot(document_id, &slot);
                self.closed.fetch_add(1, Ordering::SeqCst);
                log::info!("Evicted idle session for document {document_id}");
                true
            }
            Err(e) => {
                log::warn!("Idle session {document_id} still dirty: {e}");
                session.compact_if_idle();
                false
            }
        }
    }

    /// The live session for a document, if any.
    pub async fn session(&self, document_id: DocumentId) -> Option<Arc<Session>> {
        let slot = self.slot(document_id)?;
        let state = slot.lock().await;
        match &*state {
            SlotState::Live(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut live = Vec::new();
        for id in self.document_ids() {
            if let Some(session) = self.session(id).await {
                live.push(session);
            }
        }
        live
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.lock_slots().keys().copied().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions().await.len()
    }

    /// Flush every dirty session. Returns how many writes failed.
    pub async fn flush_all(&self) -> usize {
        let mut failures = 0;
        for session in self.sessions().await {
            if let Err(e) = self.persistence.flush(&session).await {
                log::error!("Flush of document {} failed: {e}", session.document_id());
                failures += 1;
            }
        }
        failures
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions_opened: self.opened.load(Ordering::SeqCst),
            sessions_closed: self.closed.load(Ordering::SeqCst),
            live_sessions: self.session_count().await,
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<DocumentId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, document_id: DocumentId) -> Option<Slot> {
        self.lock_slots().get(&document_id).cloned()
    }

    fn slot_or_insert(&self, document_id: DocumentId) -> Slot {
        self.lock_slots()
            .entry(document_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(SlotState::Vacant)))
            .clone()
    }

    fn remove_slot(&self, document_id: DocumentId, slot: &Slot) {
        let mut slots = self.lock_slots();
        if slots.get(&document_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(&document_id);
        }
    }
}

/// Run a store call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::PeerInbox;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn peer(user_id: UserId) -> (ConnectionId, PeerHandle, PeerInbox) {
        let id = Uuid::new_v4();
        let (handle, inbox) = PeerHandle::channel(id, OnlineUser::new(user_id, format!("user{user_id}")), 64);
        (id, handle, inbox)
    }

    fn registry(store: Arc<MemoryStore>) -> SessionRegistry {
        SessionRegistry::new(store, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_join_loads_persisted_text() {
        let store = Arc::new(MemoryStore::new().with_document(1, "hello"));
        let registry = registry(store);
        let (_id, handle, _inbox) = peer(1);

        let joined = registry.join(1, handle).await.unwrap();
        assert_eq!(joined.init.content, "hello");
        assert_eq!(joined.init.version, 0);
        assert_eq!(joined.init.nodes.len(), 5);
        assert_eq!(joined.init.online.len(), 1);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_document_is_refused() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let (_id, handle, _inbox) = peer(1);
        assert!(matches!(
            registry.join(9, handle).await,
            Err(SessionError::DocumentNotFound(9))
        ));
        assert!(registry.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_created_when_allowed() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(
            store.clone(),
            SessionConfig {
                create_missing_documents: true,
                ..SessionConfig::default()
            },
        );
        let (_id, handle, _inbox) = peer(1);
        let joined = registry.join(9, handle).await.unwrap();
        assert_eq!(joined.init.content, "");
        assert!(store.get(9).is_some());
    }

    #[tokio::test]
    async fn test_second_join_shares_session() {
        let store = Arc::new(MemoryStore::new().with_document(1, ""));
        let registry = registry(store);
        let (_a, ha, _ia) = peer(1);
        let (_b, hb, _ib) = peer(2);

        let first = registry.join(1, ha).await.unwrap();
        let second = registry.join(1, hb).await.unwrap();
        assert!(Arc::ptr_eq(&first.session, &second.session));
        assert_eq!(second.init.online.len(), 2);
        assert_eq!(registry.stats().await.sessions_opened, 1);
    }

    #[tokio::test]
    async fn test_last_leave_flushes_and_closes() {
        let store = Arc::new(MemoryStore::new().with_document(1, ""));
        let registry = registry(store.clone());
        let (a, ha, _ia) = peer(1);
        let (b, hb, _ib) = peer(2);
        let joined = registry.join(1, ha).await.unwrap();
        registry.join(1, hb).await.unwrap();

        let actor = ActorId::for_connection(1, "aaaa");
        joined.session.apply_client_ops(
            &actor,
            1,
            vec![ClientOp::Edit(TextEdit::Insert {
                position: 0,
                text: "hi".into(),
            })],
            a,
        );

        assert_eq!(registry.leave(1, a).await, LeaveOutcome::Remaining(1));
        assert_eq!(store.commit_count(), 0);
        assert_eq!(registry.leave(1, b).await, LeaveOutcome::Closed);
        assert_eq!(store.get(1).unwrap().content, "hi");
        assert_eq!(store.get(1).unwrap().version, 2);
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.leave(1, b).await, LeaveOutcome::NotJoined);
    }

    #[tokio::test]
    async fn test_failed_final_flush_keeps_session() {
        let store = Arc::new(MemoryStore::new().with_document(1, ""));
        let registry = registry(store.clone());
        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();
        joined.session.apply_snapshot(&ActorId::for_connection(1, "aaaa"), 1, "draft", a);

        store.set_fail_writes(true);
        assert_eq!(registry.leave(1, a).await, LeaveOutcome::KeptDirty);
        let kept = registry.session(1).await.unwrap();
        assert!(kept.is_dirty());

        store.set_fail_writes(false);
        assert!(registry.evict_if_idle(1).await);
        assert_eq!(store.get(1).unwrap().content, "draft");
        assert!(registry.session(1).await.is_none());
    }

    #[tokio::test]
    async fn test_kept_session_compacted_before_rejoin() {
        let store = Arc::new(MemoryStore::new().with_document(1, "0123456789"));
        let registry = registry(store.clone());
        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();
        let actor = ActorId::for_connection(1, "aaaa");
        joined.session.apply_snapshot(&actor, 1, "09", a);
        assert_eq!(joined.session.lock_engine().stats().tombstones, 8);

        store.set_fail_writes(true);
        assert_eq!(registry.leave(1, a).await, LeaveOutcome::KeptDirty);
        let stats = joined.session.lock_engine().stats();
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.version, 8);
        assert!(joined.session.is_dirty());

        // The rejoiner gets a compact node list at a fresh epoch.
        let (b, hb, _ib) = peer(2);
        let rejoined = registry.join(1, hb).await.unwrap();
        assert!(Arc::ptr_eq(&joined.session, &rejoined.session));
        assert_eq!(rejoined.init.content, "09");
        assert_eq!(rejoined.init.nodes.len(), 2);
        assert_eq!(rejoined.init.epoch, 8);

        let mut replica = DocumentEngine::from_snapshot(
            rejoined.init.nodes.clone(),
            rejoined.init.version,
            rejoined.init.epoch,
            EngineConfig::default(),
        )
        .unwrap();
        let op = replica
            .apply_insert(&ActorId::for_connection(2, "bbbb"), 1, '5')
            .unwrap();
        let outcome = rejoined.session.apply_client_ops(
            &ActorId::for_connection(2, "bbbb"),
            2,
            vec![ClientOp::Node(op)],
            b,
        );
        assert!(outcome.rejected.is_empty());
        assert_eq!(rejoined.session.content(), "059");
        assert_eq!(replica.materialize(), "059");

        store.set_fail_writes(false);
        assert_eq!(registry.leave(1, b).await, LeaveOutcome::Closed);
        assert_eq!(store.get(1).unwrap().content, "059");
    }

    #[tokio::test]
    async fn test_attached_session_not_compacted() {
        let store = Arc::new(MemoryStore::new().with_document(1, "abc"));
        let registry = registry(store);
        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();
        joined.session.apply_snapshot(&ActorId::for_connection(1, "aaaa"), 1, "a", a);

        assert_eq!(joined.session.compact_if_idle(), 0);
        assert_eq!(joined.session.lock_engine().stats().tombstones, 2);
    }

    #[tokio::test]
    async fn test_concurrent_joins_open_one_session() {
        let store = Arc::new(MemoryStore::new().with_document(1, "x"));
        store.set_read_latency(Duration::from_millis(50));
        let registry = Arc::new(registry(store));

        let mut tasks = Vec::new();
        for user in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (_id, handle, inbox) = peer(user);
                let joined = registry.join(1, handle).await.unwrap();
                (joined.session, inbox)
            }));
        }
        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        let first = &sessions[0].0;
        assert!(sessions.iter().all(|(s, _)| Arc::ptr_eq(s, first)));
        assert_eq!(first.connection_count(), 16);
        assert_eq!(registry.stats().await.sessions_opened, 1);
    }

    #[tokio::test]
    async fn test_rejoin_after_close_sees_flushed_text() {
        let store = Arc::new(MemoryStore::new().with_document(1, ""));
        store.set_write_latency(Duration::from_millis(100));
        let registry = Arc::new(registry(store));

        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();
        joined.session.apply_snapshot(&ActorId::for_connection(1, "aaaa"), 1, "persist me", a);

        let leaver = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.leave(1, a).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (_b, hb, _ib) = peer(2);
        let rejoined = registry.join(1, hb).await.unwrap();
        assert_eq!(leaver.await.unwrap(), LeaveOutcome::Closed);
        assert_eq!(rejoined.init.content, "persist me");
        assert!(!Arc::ptr_eq(&joined.session, &rejoined.session));
        assert_eq!(registry.stats().await.sessions_opened, 2);
    }

    #[tokio::test]
    async fn test_batch_relayed_to_others_only() {
        let store = Arc::new(MemoryStore::new().with_document(1, "ac"));
        let registry = registry(store);
        let (a, ha, mut ia) = peer(1);
        let (_b, hb, mut ib) = peer(2);
        let joined = registry.join(1, ha).await.unwrap();
        registry.join(1, hb).await.unwrap();

        let outcome = joined.session.apply_client_ops(
            &ActorId::for_connection(1, "aaaa"),
            1,
            vec![ClientOp::Edit(TextEdit::Insert {
                position: 1,
                text: "b".into(),
            })],
            a,
        );
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.version, 1);

        let frame = ib.messages.recv().await.unwrap();
        let ServerMessage::CrdtOps { ops, delta, version, user_id } = ServerMessage::parse(&frame).unwrap() else {
            panic!("expected crdt_ops");
        };
        assert_eq!(ops, outcome.applied);
        assert_eq!(delta.apply("ac").unwrap(), "abc");
        assert_eq!(version, 1);
        assert_eq!(user_id, 1);
        assert!(ia.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_foreign_actor_rejected_and_edits_clamped() {
        let store = Arc::new(MemoryStore::new().with_document(1, "abc"));
        let registry = registry(store);
        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();

        let forged = Operation::Insert {
            id: inkwell_core::NodeId::new("user_2.ffff", 1),
            origin: None,
            value: 'z',
            logical_time: 10,
            position_hint: 0,
        };
        let outcome = joined.session.apply_client_ops(
            &ActorId::for_connection(1, "aaaa"),
            1,
            vec![
                ClientOp::Node(forged),
                ClientOp::Edit(TextEdit::Insert {
                    position: 99,
                    text: "!".into(),
                }),
                ClientOp::Edit(TextEdit::Delete {
                    position: 2,
                    length: 50,
                }),
            ],
            a,
        );
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(joined.session.content(), "ab");
    }

    #[tokio::test]
    async fn test_runaway_clock_rejected_and_editing_continues() {
        let store = Arc::new(MemoryStore::new().with_document(1, "ab"));
        let registry = registry(store);
        let (a, ha, _ia) = peer(1);
        let joined = registry.join(1, ha).await.unwrap();
        let actor = ActorId::for_connection(1, "aaaa");

        let runaway = Operation::Insert {
            id: inkwell_core::NodeId::new("user_1.aaaa", u64::MAX),
            origin: None,
            value: 'z',
            logical_time: u64::MAX,
            position_hint: 0,
        };
        let outcome = joined.session.apply_client_ops(&actor, 1, vec![ClientOp::Node(runaway)], a);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.rejected.len(), 1);

        let outcome = joined.session.apply_client_ops(
            &actor,
            1,
            vec![ClientOp::Edit(TextEdit::Insert {
                position: 2,
                text: "c".into(),
            })],
            a,
        );
        assert!(outcome.rejected.is_empty());
        assert_eq!(joined.session.content(), "abc");
    }
}
