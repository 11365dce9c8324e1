//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle as an explicit state machine with backoff
//! - A local replica that accepts edits as soon as the first `init` arrived
//! - Offline queue for edits made while disconnected, replayed on reconnect
//! - Local draft retained until the server confirmed every edit
//!
//! ```text
//!          Start            Opened
//!   Idle ────────► Connecting ────────► Connected
//!                   ▲    │                  │
//!      retry timer  │    │ failed           │ closed (≠1008)
//!                   │    ▼                  ▼
//!                  BackingOff ◄─────────────┘
//!                        │ attempts exhausted / closed 1008
//!                        ▼
//!                      Failed
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inkwell_core::{ActorId, Delta, DocumentEngine, EngineConfig, EngineError, NodeRecord, Operation};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::presence::{CursorRange, OnlineUser, PresenceAction};
use crate::protocol::{
    now_millis, ClientMessage, ClientOp, DocumentId, ProtocolError, ServerMessage, UserId,
    CLOSE_POLICY_VIOLATION,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no initial state received yet")]
    NotSynced,
    #[error("offline queue is full ({0} operations)")]
    QueueFull(usize),
    #[error("client stopped")]
    Stopped,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ─── Connection state machine ─────────────────────────────────────────

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    BackingOff,
    /// Terminal: the server refused the credential or the document.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Start,
    Opened,
    /// The transport could not be established.
    ConnectFailed,
    /// An open connection ended, with the close code if one was received.
    Closed { code: Option<u16> },
    RetryElapsed,
    Stop,
}

impl ConnectionState {
    /// Next state. `attempts` counts consecutive failed attempts including
    /// the one that just failed.
    pub fn on_event(self, event: ConnectionEvent, attempts: u32, policy: &ReconnectPolicy) -> Self {
        use ConnectionEvent as E;
        use ConnectionState as S;
        match (self, event) {
            (_, E::Stop) => S::Idle,
            (S::Failed, _) => S::Failed,
            (S::Idle, E::Start) => S::Connecting,
            (S::Connecting, E::Opened) => S::Connected,
            (S::Connecting | S::Connected, E::Closed { code: Some(CLOSE_POLICY_VIOLATION) }) => S::Failed,
            (S::Connecting, E::ConnectFailed) | (S::Connecting | S::Connected, E::Closed { .. }) => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    S::Failed
                } else {
                    S::BackingOff
                }
            }
            (S::BackingOff, E::RetryElapsed) => S::Connecting,
            (state, _) => state,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Give up after this many consecutive failures (None = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn for_testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

/// Delay before retry number `attempt` (0-based): exponential, capped.
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let factor = policy.multiplier.max(1.0).powi(attempt.min(64) as i32);
    let delay = policy.initial_delay.as_secs_f64() * factor;
    Duration::from_secs_f64(delay.min(policy.max_delay.as_secs_f64()))
}

// ─── Offline queue and draft ──────────────────────────────────────────

/// Offline queue for edits made while disconnected.
///
/// Queued operations are replayed on reconnection.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an operation. Returns false when full.
    pub fn enqueue(&mut self, op: Operation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    /// Put unconfirmed operations back in front of newer ones.
    pub fn requeue_front(&mut self, ops: Vec<Operation>) {
        for op in ops.into_iter().rev() {
            self.queue.push_front(op);
        }
    }

    /// Drain all queued operations for replay.
    pub fn drain(&mut self) -> Vec<Operation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

/// Local copy of a document kept until the server confirmed every edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDraft {
    pub document_id: DocumentId,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Last server version the edits were made against.
    pub base_version: u64,
}

// ─── Replica ──────────────────────────────────────────────────────────

/// What an `init` did to the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebase {
    /// Nothing was pending.
    Clean,
    /// Same server replica: pending operations were re-applied unchanged.
    Replayed(usize),
    /// The server replica was reloaded: pending edits were minted again
    /// from their positions.
    Reminted(usize),
}

/// The client's replica of one document plus its unconfirmed edits.
pub struct Replica {
    document_id: DocumentId,
    engine: Option<DocumentEngine>,
    config: EngineConfig,
    actor: Option<ActorId>,
    user_id: Option<UserId>,
    queue: OfflineQueue,
    in_flight: VecDeque<Vec<Operation>>,
    server_version: u64,
    draft: Option<LocalDraft>,
    /// Set between a disconnect and the next `init`; nothing is sent then.
    awaiting_init: bool,
}

impl Replica {
    pub fn new(document_id: DocumentId, config: EngineConfig, max_queued: usize) -> Self {
        Self {
            document_id,
            engine: None,
            config,
            actor: None,
            user_id: None,
            queue: OfflineQueue::new(max_queued),
            in_flight: VecDeque::new(),
            server_version: 0,
            draft: None,
            awaiting_init: true,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.engine.is_some()
    }

    pub fn text(&self) -> Option<String> {
        self.engine.as_ref().map(|e| e.materialize().to_string())
    }

    pub fn actor(&self) -> Option<&ActorId> {
        self.actor.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn server_version(&self) -> u64 {
        self.server_version
    }

    /// Operations not yet confirmed by the server.
    pub fn pending_ops(&self) -> usize {
        self.queue.len() + self.in_flight.iter().map(Vec::len).sum::<usize>()
    }

    pub fn draft(&self) -> Option<&LocalDraft> {
        self.draft.as_ref()
    }

    pub fn insert(&mut self, position: usize, text: &str) -> Result<Vec<Operation>, ClientError> {
        self.check_room(text.chars().count())?;
        let (engine, actor) = self.editable()?;
        let ops = engine.insert_text(&actor, position, text)?;
        self.record(&ops);
        Ok(ops)
    }

    pub fn delete(&mut self, position: usize, length: usize) -> Result<Vec<Operation>, ClientError> {
        self.check_room(length)?;
        let (engine, actor) = self.editable()?;
        let ops = engine.delete_range(&actor, position, length)?;
        self.record(&ops);
        Ok(ops)
    }

    fn check_room(&self, count: usize) -> Result<(), ClientError> {
        if self.queue.len() + count > self.queue.capacity() {
            return Err(ClientError::QueueFull(self.queue.capacity()));
        }
        Ok(())
    }

    fn editable(&mut self) -> Result<(&mut DocumentEngine, ActorId), ClientError> {
        let actor = self.actor.clone().ok_or(ClientError::NotSynced)?;
        let engine = self.engine.as_mut().ok_or(ClientError::NotSynced)?;
        Ok((engine, actor))
    }

    fn record(&mut self, ops: &[Operation]) {
        for op in ops {
            // Capacity was checked before the edit.
            self.queue.enqueue(op.clone());
        }
        if let Some(content) = self.text() {
            self.draft = Some(LocalDraft {
                document_id: self.document_id,
                content,
                timestamp: now_millis(),
                base_version: self.server_version,
            });
        }
    }

    /// Move everything queued into one in-flight batch.
    pub fn take_outgoing(&mut self) -> Option<ClientMessage> {
        if self.awaiting_init || self.queue.is_empty() {
            return None;
        }
        let batch = self.queue.drain();
        let msg = ClientMessage::crdt_ops(
            batch.iter().cloned().map(ClientOp::Node).collect(),
            self.server_version,
        );
        self.in_flight.push_back(batch);
        Some(msg)
    }

    /// Adopt the server's state and rebase unconfirmed edits onto it.
    pub fn on_init(
        &mut self,
        nodes: Vec<NodeRecord>,
        version: u64,
        epoch: u64,
        actor: ActorId,
        user_id: UserId,
    ) -> Result<Rebase, ClientError> {
        let mut pending: Vec<Operation> = self.in_flight.drain(..).flatten().collect();
        pending.extend(self.queue.drain());
        let previous_epoch = self.engine.as_ref().map(DocumentEngine::epoch);

        let mut engine = DocumentEngine::from_snapshot(nodes, version, epoch, self.config.clone())?;
        let rebase = if pending.is_empty() {
            Rebase::Clean
        } else if previous_epoch == Some(epoch) {
            let count = pending.len();
            for op in pending {
                if let Err(e) = engine.apply_remote_op(op.clone()) {
                    log::warn!("Dropping unconfirmed operation on replay: {e}");
                    continue;
                }
                self.queue.enqueue(op);
            }
            Rebase::Replayed(count)
        } else {
            let reminted = remint(&mut engine, &actor, &pending);
            let count = reminted.len();
            for op in reminted {
                self.queue.enqueue(op);
            }
            Rebase::Reminted(count)
        };

        log::info!(
            "Document {} synced at version {version} (epoch {epoch}): {rebase:?}",
            self.document_id
        );
        self.engine = Some(engine);
        self.actor = Some(actor);
        self.user_id = Some(user_id);
        self.server_version = version;
        self.awaiting_init = false;
        if self.pending_ops() == 0 {
            self.draft = None;
        }
        Ok(rebase)
    }

    /// Integrate operations relayed from another client. Returns the
    /// resulting patch against the text before them.
    pub fn on_remote(&mut self, ops: Vec<Operation>, version: u64) -> Option<Delta> {
        let engine = self.engine.as_mut()?;
        let outcome = engine.apply_remote_batch(ops);
        for (op, e) in &outcome.rejected {
            log::warn!("Remote operation by {} rejected: {e}", op.actor());
        }
        self.server_version = self.server_version.max(version);
        Some(engine.to_delta(&outcome.applied))
    }

    /// The server confirmed the oldest in-flight batch.
    pub fn on_ack(&mut self, version: u64) {
        if self.in_flight.pop_front().is_none() {
            log::debug!("Ack for document {} with nothing in flight", self.document_id);
        }
        self.server_version = self.server_version.max(version);
        if self.pending_ops() == 0 {
            self.draft = None;
        }
    }

    /// Unconfirmed batches go back to the queue in their original order.
    pub fn on_disconnect(&mut self) {
        let unconfirmed: Vec<Operation> = self.in_flight.drain(..).flatten().collect();
        self.queue.requeue_front(unconfirmed);
        self.awaiting_init = true;
    }
}

/// Mint fresh operations for `pending` against a replica that never saw
/// their targets, using the positions they were made at.
fn remint(engine: &mut DocumentEngine, actor: &ActorId, pending: &[Operation]) -> Vec<Operation> {
    let mut minted = Vec::with_capacity(pending.len());
    for op in pending {
        let result = match op {
            Operation::Insert {
                value,
                position_hint,
                ..
            } => engine.apply_insert(actor, (*position_hint).min(engine.len()), *value),
            Operation::Delete { position_hint, .. } => {
                if *position_hint >= engine.len() {
                    continue;
                }
                engine.apply_delete(actor, *position_hint)
            }
        };
        match result {
            Ok(op) => minted.push(op),
            Err(e) => log::warn!("Could not rebase edit: {e}"),
        }
    }
    minted
}

// ─── Async client ─────────────────────────────────────────────────────

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    pub document_id: DocumentId,
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub engine: EngineConfig,
    pub max_queued_ops: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, document_id: DocumentId, token: Option<String>) -> Self {
        Self {
            server_url: server_url.into(),
            document_id,
            token,
            reconnect: ReconnectPolicy::default(),
            engine: EngineConfig::default(),
            max_queued_ops: 10_000,
        }
    }

    /// Full connection URL for the document.
    pub fn url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        match &self.token {
            Some(token) => format!("{base}/ws/documents/{}?token={token}", self.document_id),
            None => format!("{base}/ws/documents/{}", self.document_id),
        }
    }
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged(ConnectionState),
    /// Initial state received and unconfirmed edits rebased.
    Synced { version: u64, rebase: Rebase },
    /// Another user changed the document.
    RemoteChange { user_id: UserId, delta: Delta },
    Acked { version: u64, applied: usize },
    Presence {
        action: PresenceAction,
        user_id: UserId,
        online: Vec<OnlineUser>,
    },
    Cursor { user_id: UserId, cursor: CursorRange },
    ServerError(String),
}

enum Command {
    Cursor(CursorRange),
    Stop,
}

enum SessionEnd {
    Closed(Option<u16>),
    Stopped,
}

struct ClientShared {
    replica: Mutex<Replica>,
    state: watch::Sender<ConnectionState>,
    outgoing: Notify,
    events: mpsc::Sender<SyncEvent>,
}

impl ClientShared {
    fn replica(&self) -> MutexGuard<'_, Replica> {
        self.replica.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.try_send(event).is_err() {
            log::debug!("Event queue full or closed, dropping event");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if self.state.send_replace(state) != state {
            log::debug!("Client state → {state:?}");
            self.emit(SyncEvent::StateChanged(state));
        }
    }
}

/// The sync client.
///
/// Owns a background task that keeps a connection to the server, replays
/// queued edits after every (re)connect and applies remote edits to the
/// local replica.
pub struct SyncClient {
    shared: Arc<ClientShared>,
    commands: mpsc::Sender<Command>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    task: Option<JoinHandle<()>>,
    config: ClientConfig,
}

impl SyncClient {
    /// Start connecting in the background.
    pub fn start(config: ClientConfig) -> Self {
        let (events, event_rx) = mpsc::channel(256);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(ClientShared {
            replica: Mutex::new(Replica::new(
                config.document_id,
                config.engine.clone(),
                config.max_queued_ops,
            )),
            state,
            outgoing: Notify::new(),
            events,
        });
        let (commands, command_rx) = mpsc::channel(64);
        let task = tokio::spawn(supervise(config.clone(), shared.clone(), command_rx));
        Self {
            shared,
            commands,
            event_rx: Some(event_rx),
            task: Some(task),
            config,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn insert(&self, position: usize, text: &str) -> Result<(), ClientError> {
        self.shared.replica().insert(position, text)?;
        self.shared.outgoing.notify_one();
        Ok(())
    }

    pub fn delete(&self, position: usize, length: usize) -> Result<(), ClientError> {
        self.shared.replica().delete(position, length)?;
        self.shared.outgoing.notify_one();
        Ok(())
    }

    /// Send a cursor position. Dropped while offline.
    pub fn send_cursor(&self, position: usize, length: usize) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        self.commands
            .try_send(Command::Cursor(CursorRange { position, length }))
            .map_err(|_| ClientError::Stopped)
    }

    pub fn text(&self) -> Option<String> {
        self.shared.replica().text()
    }

    pub fn pending_ops(&self) -> usize {
        self.shared.replica().pending_ops()
    }

    pub fn draft(&self) -> Option<LocalDraft> {
        self.shared.replica().draft().cloned()
    }

    pub fn is_synced(&self) -> bool {
        self.shared.replica().is_synced()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.shared.state.subscribe();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Stopped)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close the connection and stop reconnecting.
    pub async fn stop(&mut self) {
        if self.commands.send(Command::Stop).await.is_err() {
            log::debug!("Client task already stopped");
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Client task failed: {e}");
            }
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn supervise(config: ClientConfig, shared: Arc<ClientShared>, mut commands: mpsc::Receiver<Command>) {
    let policy = &config.reconnect;
    let url = config.url();
    let mut state = ConnectionState::Idle.on_event(ConnectionEvent::Start, 0, policy);
    let mut attempts = 0u32;

    loop {
        shared.set_state(state);
        let event = match state {
            ConnectionState::Connecting => match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    attempts = 0;
                    shared.set_state(ConnectionState::Connected);
                    let end = run_connection(ws_stream, &shared, &mut commands).await;
                    shared.replica().on_disconnect();
                    match end {
                        SessionEnd::Stopped => ConnectionEvent::Stop,
                        SessionEnd::Closed(code) => {
                            attempts += 1;
                            log::info!("Connection to document {} closed ({code:?})", config.document_id);
                            state = ConnectionState::Connected;
                            ConnectionEvent::Closed { code }
                        }
                    }
                }
                Err(e) => {
                    attempts += 1;
                    log::warn!("Connecting to {url} failed: {e}");
                    ConnectionEvent::ConnectFailed
                }
            },
            ConnectionState::BackingOff => {
                let delay = backoff_delay(policy, attempts.saturating_sub(1));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => ConnectionEvent::RetryElapsed,
                    cmd = commands.recv() => match cmd {
                        Some(Command::Stop) | None => ConnectionEvent::Stop,
                        Some(Command::Cursor(_)) => continue,
                    },
                }
            }
            ConnectionState::Idle | ConnectionState::Failed => break,
            ConnectionState::Connected => ConnectionEvent::Closed { code: None },
        };
        state = state.on_event(event, attempts, policy);
    }
    shared.set_state(state);
}

async fn run_connection<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    shared: &ClientShared,
    commands: &mut mpsc::Receiver<Command>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = ws_stream.split();

    loop {
        let outgoing: Option<String> = tokio::select! {
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_server_text(text.as_str(), shared),
                Some(Ok(Message::Close(frame))) => {
                    return SessionEnd::Closed(frame.map(|f| u16::from(f.code)));
                }
                Some(Err(e)) => {
                    log::warn!("Connection error: {e}");
                    return SessionEnd::Closed(None);
                }
                None => return SessionEnd::Closed(None),
                Some(Ok(_)) => None,
            },
            _ = shared.outgoing.notified() => {
                let msg = shared.replica().take_outgoing();
                encode(msg)
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Cursor(cursor)) => encode(Some(ClientMessage::cursor(cursor.position, cursor.length))),
                Some(Command::Stop) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client stopped".to_string().into(),
                    };
                    if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                        log::debug!("Close frame not delivered: {e}");
                    }
                    return SessionEnd::Stopped;
                }
            },
        };

        if let Some(text) = outgoing {
            if let Err(e) = writer.send(Message::text(text)).await {
                log::warn!("Send failed: {e}");
                return SessionEnd::Closed(None);
            }
        }
    }
}

fn encode(msg: Option<ClientMessage>) -> Option<String> {
    msg.and_then(|msg| match msg.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            log::error!("Failed to encode outgoing message: {e}");
            None
        }
    })
}

/// Apply one server frame. Returns a reply to send, if any.
fn handle_server_text(text: &str, shared: &ClientShared) -> Option<String> {
    let msg = match ServerMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Ignoring server message: {e}");
            return None;
        }
    };

    match msg {
        ServerMessage::Init {
            version,
            epoch,
            actor,
            user_id,
            nodes,
            ..
        } => {
            let mut replica = shared.replica();
            match replica.on_init(nodes, version, epoch, actor, user_id) {
                Ok(rebase) => {
                    shared.emit(SyncEvent::Synced { version, rebase });
                    encode(replica.take_outgoing())
                }
                Err(e) => {
                    log::error!("Unusable initial state: {e}");
                    None
                }
            }
        }
        ServerMessage::CrdtOps {
            ops, version, user_id, ..
        }
        | ServerMessage::ContentUpdate {
            ops, version, user_id, ..
        } => {
            if let Some(delta) = shared.replica().on_remote(ops, version) {
                shared.emit(SyncEvent::RemoteChange { user_id, delta });
            }
            None
        }
        ServerMessage::CrdtAck { version, applied } => {
            shared.replica().on_ack(version);
            shared.emit(SyncEvent::Acked { version, applied });
            None
        }
        ServerMessage::Cursor { user_id, cursor, .. } => {
            shared.emit(SyncEvent::Cursor { user_id, cursor });
            None
        }
        ServerMessage::Presence {
            action,
            user_id,
            online_users_info,
            ..
        } => {
            shared.emit(SyncEvent::Presence {
                action,
                user_id,
                online: online_users_info,
            });
            None
        }
        ServerMessage::Ping { ts } => encode(Some(ClientMessage::Pong { ts: Some(ts) })),
        ServerMessage::Error { payload } => {
            log::warn!("Server error: {}", payload.message);
            shared.emit(SyncEvent::ServerError(payload.message));
            None
        }
        ServerMessage::Selection { .. } | ServerMessage::Pong { .. } => None,
    }
}
