//! JSON wire protocol, one message per WebSocket text frame.
//!
//! Every message is an object tagged by `type`:
//! ```text
//! client ──► {"type":"crdt_ops","ops":[...],"version":12}
//! server ──► {"type":"crdt_ack","version":15,"applied":3}
//! server ──► {"type":"crdt_ops","ops":[...],"delta":{"ops":[...]},"version":15,"user_id":7}
//! ```
//!
//! Both directions are closed enums. An unknown `type` is answered with an
//! `error` message and the connection stays open.

use std::sync::Arc;

use inkwell_core::{ActorId, Delta, NodeRecord, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::presence::{CursorRange, OnlineUser, PresenceAction};

pub type DocumentId = u64;
pub type UserId = u64;
pub type ConnectionId = Uuid;

/// Close code sent when the credential is rejected or the document does
/// not exist. Clients must not reconnect with the same credential.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

const CLIENT_TYPES: &[&str] = &[
    "content_update",
    "content",
    "crdt_ops",
    "cursor",
    "selection",
    "ping",
    "pong",
];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("binary frames are not supported")]
    BinaryFrame,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Positional edit for clients without a local replica. The server mints
/// node operations for it against its current text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextEdit {
    Insert { position: usize, text: String },
    Delete { position: usize, length: usize },
}

/// One entry of an inbound `crdt_ops` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientOp {
    Node(Operation),
    Edit(TextEdit),
}

// ─── Client → Server ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Full-content snapshot. Accepts `payload.html`, `html` or `content`.
    ContentUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<ContentPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Legacy spelling of `content_update`.
    Content { content: String },
    CrdtOps {
        ops: Vec<ClientOp>,
        /// Version the client based the batch on. Informational.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    /// Accepts either `{position, length}` or `{cursor: {position, length}}`.
    Cursor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<CursorRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
        #[serde(default)]
        length: usize,
    },
    Selection {
        #[serde(default)]
        selection: Value,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
}

impl ClientMessage {
    /// Parse one text frame, telling unknown types apart from garbage.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let err = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => return Ok(msg),
            Err(err) => err,
        };
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        match value.get("type").and_then(Value::as_str) {
            None => Err(ProtocolError::Malformed("missing message type".into())),
            Some(kind) if !CLIENT_TYPES.contains(&kind) => {
                Err(ProtocolError::UnsupportedType(kind.to_string()))
            }
            Some(_) => Err(ProtocolError::Malformed(err.to_string())),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Snapshot text carried by `content_update`/`content`.
    pub fn snapshot_text(&self) -> Option<&str> {
        match self {
            ClientMessage::ContentUpdate {
                payload,
                html,
                content,
            } => payload
                .as_ref()
                .map(|p| p.html.as_str())
                .or(html.as_deref())
                .or(content.as_deref()),
            ClientMessage::Content { content } => Some(content),
            _ => None,
        }
    }

    /// Cursor carried by a `cursor` message.
    pub fn cursor_range(&self) -> Option<CursorRange> {
        match self {
            ClientMessage::Cursor {
                cursor,
                position,
                length,
            } => cursor.or(position.map(|position| CursorRange {
                position,
                length: *length,
            })),
            _ => None,
        }
    }

    pub fn crdt_ops(ops: Vec<ClientOp>, version: u64) -> Self {
        ClientMessage::CrdtOps {
            ops,
            version: Some(version),
        }
    }

    pub fn cursor(position: usize, length: usize) -> Self {
        ClientMessage::Cursor {
            cursor: Some(CursorRange { position, length }),
            position: None,
            length: 0,
        }
    }

    pub fn content_update(html: impl Into<String>) -> Self {
        ClientMessage::ContentUpdate {
            payload: Some(ContentPayload { html: html.into() }),
            html: None,
            content: None,
        }
    }
}

// ─── Server → Client ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full state for a new connection.
    Init {
        content: String,
        payload: ContentPayload,
        version: u64,
        /// Version the server's replica was seeded at. Node ids from an
        /// earlier epoch do not resolve against this one.
        epoch: u64,
        /// Actor this connection must mint node ids as.
        actor: ActorId,
        user_id: UserId,
        nodes: Vec<NodeRecord>,
    },
    ContentUpdate {
        payload: ContentPayload,
        user_id: UserId,
        version: u64,
        #[serde(default)]
        ops: Vec<Operation>,
    },
    CrdtOps {
        ops: Vec<Operation>,
        delta: Delta,
        version: u64,
        user_id: UserId,
    },
    CrdtAck {
        version: u64,
        applied: usize,
    },
    Cursor {
        user_id: UserId,
        username: String,
        cursor: CursorRange,
        color: String,
    },
    Selection {
        user_id: UserId,
        username: String,
        selection: Value,
        color: String,
    },
    Presence {
        action: PresenceAction,
        user_id: UserId,
        username: String,
        online_users_info: Vec<OnlineUser>,
    },
    Ping {
        ts: u64,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    Error {
        payload: ErrorPayload,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encode once for fan-out to many peers.
    pub fn to_shared(&self) -> Result<Arc<str>, ProtocolError> {
        Ok(Arc::from(self.to_json()?))
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Init { .. } => "init",
            ServerMessage::ContentUpdate { .. } => "content_update",
            ServerMessage::CrdtOps { .. } => "crdt_ops",
            ServerMessage::CrdtAck { .. } => "crdt_ack",
            ServerMessage::Cursor { .. } => "cursor",
            ServerMessage::Selection { .. } => "selection",
            ServerMessage::Presence { .. } => "presence",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Milliseconds since the Unix epoch, for ping timestamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
