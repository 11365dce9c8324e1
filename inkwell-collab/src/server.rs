//! WebSocket sync server with per-document session routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐   /ws/documents/{id}?token=…
//!             ├── Session (doc id) ── DocumentEngine ── BroadcastGroup
//! Client B ──┘        │                                       │
//!                     │                          ┌────────────┼────────────┐
//!                     ▼                          ▼            ▼            ▼
//!            PersistenceCoordinator           Client A     Client B     Client C
//!                     │
//!               dyn TextStore (RocksDB / memory)
//! ```
//!
//! Each connection runs in its own task:
//! 1. handshake: the URL names the document, the `token` query parameter is
//!    checked by the [`CredentialCheck`]; failures close with 1008;
//! 2. join: the registry attaches the connection and the task sends `init`
//!    and `presence`;
//! 3. loop: inbound frames, outbound broadcasts, heartbeat, eviction and
//!    shutdown are multiplexed in one `select!`;
//! 4. cleanup: leave the session (forcing a flush when it was the last
//!    connection) and tell the others.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inkwell_core::{ActorId, EngineConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::auth::{CredentialCheck, Identity};
use crate::broadcast::PeerHandle;
use crate::persistence::{self, FlushConfig};
use crate::presence::{color_for, online_users, OnlineUser, PresenceAction};
use crate::protocol::{
    now_millis, ClientMessage, ConnectionId, ContentPayload, DocumentId, ProtocolError, ServerMessage,
};
use crate::session::{Session, SessionConfig, SessionError, SessionRegistry};
use crate::storage::{MemoryStore, RocksStore, StoreConfig, StoreError, TextStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound queue capacity per connection
    pub peer_queue_capacity: usize,
    /// Time between server pings
    pub heartbeat_interval: Duration,
    /// Unanswered pings before a connection is closed
    pub max_missed_pongs: u32,
    pub flush: FlushConfig,
    /// RocksDB directory (None = in-memory store)
    pub storage_path: Option<PathBuf>,
    /// Create unknown documents on first join
    pub create_missing_documents: bool,
    /// Largest accepted text frame
    pub max_message_bytes: usize,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            peer_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
            flush: FlushConfig::default(),
            storage_path: None,
            create_missing_documents: false,
            max_message_bytes: 1024 * 1024,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            flush: FlushConfig::for_testing(),
            ..Self::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            peer_queue_capacity: self.peer_queue_capacity,
            create_missing_documents: self.create_missing_documents,
            engine: self.engine.clone(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_sessions: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_handshakes: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
}

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
struct ConnectionContext {
    registry: Arc<SessionRegistry>,
    auth: Arc<dyn CredentialCheck>,
    stats: Arc<AtomicServerStats>,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
}

/// The sync server.
pub struct SyncServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    auth: Arc<dyn CredentialCheck>,
    stats: Arc<AtomicServerStats>,
    shutdown: watch::Sender<bool>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, store: Arc<dyn TextStore>, auth: Arc<dyn CredentialCheck>) -> Self {
        let registry = Arc::new(SessionRegistry::new(store, config.session_config()));
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            registry,
            auth,
            stats: Arc::new(AtomicServerStats::default()),
            shutdown,
        }
    }

    /// Open the store named by `config.storage_path`, or an in-memory one.
    pub fn with_storage(config: ServerConfig, auth: Arc<dyn CredentialCheck>) -> Result<Self, StoreError> {
        let store: Arc<dyn TextStore> = match &config.storage_path {
            Some(path) => {
                let store = RocksStore::open(StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                })?;
                log::info!("Opened document store at {}", path.display());
                Arc::new(store)
            }
            None => {
                log::warn!("No storage path configured, documents live in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(config, store, auth))
    }

    /// Serve until the process is killed.
    pub async fn run(&self) -> Result<(), BoxError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind `config.bind_addr` and serve until `signal` resolves.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener, signal).await
    }

    /// Accept connections on `listener` until `signal` resolves, then close
    /// every connection and flush every dirty session.
    pub async fn serve(&self, listener: TcpListener, signal: impl Future<Output = ()>) -> Result<(), BoxError> {
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.shutdown.send_replace(false);
        let flusher = persistence::spawn_periodic(
            self.registry.clone(),
            &self.config.flush,
            self.shutdown.subscribe(),
        );

        tokio::pin!(signal);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            log::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");
                    let ctx = self.context();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, ctx).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = &mut signal => break,
            }
        }

        log::info!("Sync server shutting down");
        self.shutdown.send_replace(true);
        if let Err(e) = flusher.await {
            log::error!("Periodic flusher panicked: {e}");
        }
        let failures = self.registry.flush_all().await;
        if failures > 0 {
            log::error!("{failures} documents could not be flushed on shutdown");
        }
        Ok(())
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            auth: self.auth.clone(),
            stats: self.stats.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            rejected_handshakes: self.stats.rejected_handshakes.load(Ordering::Relaxed),
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            total_bytes: self.stats.total_bytes.load(Ordering::Relaxed),
            active_sessions: self.registry.session_count().await,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// Document and credential named by a connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub document_id: DocumentId,
    pub token: Option<String>,
}

/// Parse `/ws/documents/{id}` plus an optional `token` query parameter.
pub fn parse_route(path: &str, query: Option<&str>) -> Option<Route> {
    let id = path.strip_prefix("/ws/documents/")?.trim_end_matches('/');
    let document_id = id.parse().ok()?;
    let token = query.and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "token")
            .map(|(_, value)| value.to_string())
    });
    Some(Route { document_id, token })
}

/// Schedules `leave` if the connection task is dropped before cleanup.
struct LeaveGuard {
    registry: Arc<SessionRegistry>,
    document_id: DocumentId,
    connection_id: ConnectionId,
    armed: bool,
}

impl LeaveGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = self.registry.clone();
        let (document_id, connection_id) = (self.document_id, self.connection_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.leave(document_id, connection_id).await;
                });
            }
            Err(_) => log::warn!("Connection {connection_id} dropped outside the runtime, leave skipped"),
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: ConnectionContext) -> Result<(), BoxError> {
    let mut path = String::new();
    let mut query = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            query = req.uri().query().map(str::to_string);
            Ok(resp)
        },
    )
    .await?;

    ctx.stats.total_connections.fetch_add(1, Ordering::Relaxed);
    ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);
    let result = serve_connection(ws_stream, addr, &path, query.as_deref(), &ctx).await;
    ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    result
}

async fn close_with(ws_stream: &mut WebSocketStream<TcpStream>, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws_stream.close(Some(frame)).await {
        log::debug!("Close handshake failed: {e}");
    }
}

async fn serve_connection(
    mut ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    path: &str,
    query: Option<&str>,
    ctx: &ConnectionContext,
) -> Result<(), BoxError> {
    // CONNECTING → AUTHENTICATED
    let Some(route) = parse_route(path, query) else {
        log::warn!("Rejecting {addr}: no document in path {path}");
        ctx.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
        close_with(&mut ws_stream, CloseCode::Policy, "unknown route").await;
        return Ok(());
    };
    let identity = match ctx.auth.check_credential(route.token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            log::warn!("Rejecting {addr} for document {}: {e}", route.document_id);
            ctx.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
            close_with(&mut ws_stream, CloseCode::Policy, "authentication failed").await;
            return Ok(());
        }
    };

    let connection_id = Uuid::new_v4();
    let tag = connection_id.simple().to_string();
    let actor = ActorId::for_connection(identity.user_id, &tag[..8]);
    let user = OnlineUser::new(identity.user_id, identity.username.clone());
    let (peer, mut inbox) = PeerHandle::channel(connection_id, user, ctx.config.peer_queue_capacity);

    let joined = match ctx.registry.join(route.document_id, peer).await {
        Ok(joined) => joined,
        Err(SessionError::DocumentNotFound(id)) => {
            log::warn!("Rejecting {addr}: document {id} not found");
            ctx.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
            close_with(&mut ws_stream, CloseCode::Policy, "document not found").await;
            return Ok(());
        }
        Err(e) => {
            log::error!("Failed to open document {}: {e}", route.document_id);
            close_with(&mut ws_stream, CloseCode::Error, "internal error").await;
            return Ok(());
        }
    };
    let mut guard = LeaveGuard {
        registry: ctx.registry.clone(),
        document_id: route.document_id,
        connection_id,
        armed: true,
    };

    let conn = Connection {
        connection_id,
        document_id: route.document_id,
        identity,
        actor,
        session: joined.session,
    };
    log::info!(
        "{} ({}) joined document {} as {}",
        conn.identity.username,
        addr,
        conn.document_id,
        conn.actor
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let result: Result<(), BoxError> = async {
        // AUTHENTICATED → SYNCED
        let init = joined.init;
        send_json(
            &mut ws_sender,
            &ServerMessage::Init {
                payload: ContentPayload {
                    html: init.content.clone(),
                },
                content: init.content,
                version: init.version,
                epoch: init.epoch,
                actor: conn.actor.clone(),
                user_id: conn.identity.user_id,
                nodes: init.nodes,
            },
        )
        .await?;
        let online = online_users(init.online);
        send_json(&mut ws_sender, &conn.presence(PresenceAction::Init, online.clone())).await?;
        conn.relay(&conn.presence(PresenceAction::Join, online));

        let heartbeat = ctx.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        let mut missed_pongs = 0u32;
        let mut shutdown = ctx.shutdown.clone();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            ctx.stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            ctx.stats.total_bytes.fetch_add(text.len() as u64, Ordering::Relaxed);
                            let reply = if text.len() > ctx.config.max_message_bytes {
                                Some(ServerMessage::error(
                                    ProtocolError::TooLarge {
                                        size: text.len(),
                                        limit: ctx.config.max_message_bytes,
                                    }
                                    .to_string(),
                                ))
                            } else {
                                conn.handle_text(text.as_str(), &mut missed_pongs)
                            };
                            if let Some(reply) = reply {
                                send_json(&mut ws_sender, &reply).await?;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            send_json(&mut ws_sender, &ServerMessage::error(ProtocolError::BinaryFrame.to_string())).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                        _ => {}
                    }
                }

                frame = inbox.messages.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    if missed_pongs >= ctx.config.max_missed_pongs {
                        log::warn!("{addr} missed {missed_pongs} pongs, closing");
                        close_sink(&mut ws_sender, CloseCode::Away, "heartbeat timeout").await;
                        break;
                    }
                    missed_pongs += 1;
                    send_json(&mut ws_sender, &ServerMessage::Ping { ts: now_millis() }).await?;
                }

                _ = inbox.kicked.notified() => {
                    log::warn!("{addr} fell behind on document {}, closing", conn.document_id);
                    close_sink(&mut ws_sender, CloseCode::Again, "outbound queue overflow").await;
                    break;
                }

                _ = shutdown.changed() => {
                    close_sink(&mut ws_sender, CloseCode::Away, "server shutting down").await;
                    break;
                }
            }
        }
        Ok(())
    }
    .await;

    // CLOSING → CLOSED
    guard.disarm();
    let outcome = ctx.registry.leave(conn.document_id, connection_id).await;
    log::info!(
        "{} left document {} ({outcome:?})",
        conn.identity.username,
        conn.document_id
    );
    let remaining = online_users(conn.session.peers().peers());
    if !remaining.is_empty() {
        conn.relay(&conn.presence(PresenceAction::Leave, remaining));
    }
    result
}

async fn send_json(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
    ws_sender.send(Message::text(msg.to_json()?)).await?;
    Ok(())
}

async fn close_sink(ws_sender: &mut WsSink, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
        log::debug!("Close frame not delivered: {e}");
    }
}

/// One authenticated connection attached to a session.
struct Connection {
    connection_id: ConnectionId,
    document_id: DocumentId,
    identity: Identity,
    actor: ActorId,
    session: Arc<Session>,
}

impl Connection {
    /// Handle one inbound text frame. Returns the reply for this connection.
    fn handle_text(&self, text: &str, missed_pongs: &mut u32) -> Option<ServerMessage> {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e @ ProtocolError::UnsupportedType(_)) => {
                log::debug!("{}: {e}", self.identity.username);
                return Some(ServerMessage::error(e.to_string()));
            }
            Err(e) => {
                log::warn!("Invalid message from {}: {e}", self.identity.username);
                return Some(ServerMessage::error(format!("Invalid message: {e}")));
            }
        };

        match msg {
            ClientMessage::CrdtOps { ops, .. } => {
                let outcome =
                    self.session
                        .apply_client_ops(&self.actor, self.identity.user_id, ops, self.connection_id);
                for reason in &outcome.rejected {
                    log::warn!("Dropped op from {} on document {}: {reason}", self.actor, self.document_id);
                }
                Some(ServerMessage::CrdtAck {
                    version: outcome.version,
                    applied: outcome.applied.len(),
                })
            }
            ClientMessage::ContentUpdate { .. } | ClientMessage::Content { .. } => {
                let Some(content) = msg.snapshot_text() else {
                    return Some(ServerMessage::error("content_update without content"));
                };
                let outcome =
                    self.session
                        .apply_snapshot(&self.actor, self.identity.user_id, content, self.connection_id);
                for reason in &outcome.rejected {
                    log::warn!("Snapshot from {} not applied: {reason}", self.actor);
                }
                None
            }
            ClientMessage::Cursor { .. } => {
                let Some(cursor) = msg.cursor_range() else {
                    return Some(ServerMessage::error("cursor message without position"));
                };
                log::trace!("cursor from {} at {}", self.identity.username, cursor.position);
                self.relay(&ServerMessage::Cursor {
                    user_id: self.identity.user_id,
                    username: self.identity.username.clone(),
                    cursor,
                    color: color_for(self.identity.user_id).to_string(),
                });
                None
            }
            ClientMessage::Selection { selection } => {
                self.relay(&ServerMessage::Selection {
                    user_id: self.identity.user_id,
                    username: self.identity.username.clone(),
                    selection,
                    color: color_for(self.identity.user_id).to_string(),
                });
                None
            }
            ClientMessage::Ping { ts } => Some(ServerMessage::Pong { ts }),
            ClientMessage::Pong { .. } => {
                *missed_pongs = 0;
                None
            }
        }
    }

    fn presence(&self, action: PresenceAction, online_users_info: Vec<OnlineUser>) -> ServerMessage {
        ServerMessage::Presence {
            action,
            user_id: self.identity.user_id,
            username: self.identity.username.clone(),
            online_users_info,
        }
    }

    /// Send to every other connection of the session.
    fn relay(&self, msg: &ServerMessage) {
        if let Err(e) = self.session.peers().broadcast(msg, Some(self.connection_id)) {
            log::error!("Failed to relay {} on document {}: {e}", msg.kind(), self.document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokens;
    use crate::storage::StoredText;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.peer_queue_capacity, 256);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.max_missed_pongs, 2);
        assert!(config.storage_path.is_none());
        assert!(!config.create_missing_documents);
    }

    #[test]
    fn test_session_config_follows_server_config() {
        let config = ServerConfig {
            peer_queue_capacity: 8,
            create_missing_documents: true,
            ..ServerConfig::for_testing()
        };
        let session = config.session_config();
        assert_eq!(session.peer_queue_capacity, 8);
        assert!(session.create_missing_documents);
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(
            parse_route("/ws/documents/42", Some("token=abc&x=1")),
            Some(Route {
                document_id: 42,
                token: Some("abc".into())
            })
        );
        assert_eq!(
            parse_route("/ws/documents/7/", None),
            Some(Route {
                document_id: 7,
                token: None
            })
        );
        assert_eq!(parse_route("/ws/documents/", None), None);
        assert_eq!(parse_route("/ws/documents/abc", None), None);
        assert_eq!(parse_route("/other/1", None), None);
    }

    #[tokio::test]
    async fn test_server_with_memory_storage() {
        let server = SyncServer::with_storage(ServerConfig::for_testing(), Arc::new(StaticTokens::new())).unwrap();
        assert_eq!(server.bind_addr(), "127.0.0.1:0");
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_server_with_rocks_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::for_testing()
        };
        assert!(SyncServer::with_storage(config, Arc::new(StaticTokens::new())).is_ok());
    }

    fn connection(session: Arc<Session>) -> Connection {
        Connection {
            connection_id: Uuid::new_v4(),
            document_id: 1,
            identity: Identity::new(1, "alice"),
            actor: ActorId::for_connection(1, "abcdabcd"),
            session,
        }
    }

    fn session(text: &str) -> Arc<Session> {
        Arc::new(Session::new(
            1,
            StoredText {
                content: text.into(),
                version: 0,
            },
            &SessionConfig::default(),
        ))
    }

    #[test]
    fn test_unknown_type_gets_error_reply() {
        let conn = connection(session(""));
        let mut missed = 0;
        let reply = conn.handle_text(r#"{"type":"teleport"}"#, &mut missed).unwrap();
        assert_eq!(reply, ServerMessage::error("Unsupported message type: teleport"));
    }

    #[test]
    fn test_crdt_ops_acked() {
        let conn = connection(session("ac"));
        let mut missed = 0;
        let reply = conn
            .handle_text(
                r#"{"type":"crdt_ops","ops":[{"type":"insert","position":1,"text":"b"}]}"#,
                &mut missed,
            )
            .unwrap();
        assert_eq!(reply, ServerMessage::CrdtAck { version: 1, applied: 1 });
        assert_eq!(conn.session.content(), "abc");
    }

    #[test]
    fn test_snapshot_and_heartbeat() {
        let conn = connection(session("hello"));
        let mut missed = 2;
        assert!(conn
            .handle_text(r#"{"type":"content_update","payload":{"html":"help"}}"#, &mut missed)
            .is_none());
        assert_eq!(conn.session.content(), "help");

        assert!(conn.handle_text(r#"{"type":"pong"}"#, &mut missed).is_none());
        assert_eq!(missed, 0);
        assert_eq!(
            conn.handle_text(r#"{"type":"ping","ts":5}"#, &mut missed),
            Some(ServerMessage::Pong { ts: Some(5) })
        );
    }
}
