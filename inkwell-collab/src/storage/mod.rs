//! Durable document text.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────┐  commit(text, version)  ┌──────────────────────┐
//! │ PersistenceCoordinator│ ──────────────────────► │ dyn TextStore        │
//! │ (flush on timer /     │                         │  ├─ RocksStore       │
//! │  last leave)          │ ◄────────────────────── │  └─ MemoryStore      │
//! └──────────────────────┘   load → StoredText     └──────────────────────┘
//! ```
//!
//! The store holds one record per document: the materialized text and the
//! version it was materialized at. Commits carrying an older version than
//! the stored one are ignored, so a slow flush can never roll a document
//! back past a newer one.
//!
//! Stores are synchronous; async callers go through `spawn_blocking`.

pub mod memory;
pub mod rocks;

use thiserror::Error;

use crate::protocol::DocumentId;

pub use memory::MemoryStore;
pub use rocks::{DocumentMetadata, RocksStore, StoreConfig};

/// Persisted text with the version it was written at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredText {
    pub content: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error("document already exists: {0}")]
    AlreadyExists(DocumentId),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// The persistence collaborator the session layer consumes.
pub trait TextStore: Send + Sync + 'static {
    /// Current text of a document, or `NotFound`.
    fn load_document_text(&self, id: DocumentId) -> Result<StoredText, StoreError>;

    /// Replace a document's text in one atomic write. A commit older than
    /// the stored version is skipped.
    fn commit_document_text(
        &self,
        id: DocumentId,
        text: &str,
        version: u64,
    ) -> Result<(), StoreError>;

    /// Create a document at version 0. Fails with `AlreadyExists`.
    fn create_document(&self, id: DocumentId, text: &str) -> Result<(), StoreError>;
}
