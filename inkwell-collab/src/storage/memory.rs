//! In-memory [`TextStore`] with injectable latency and failures.
//!
//! Used by tests and by servers started without a data directory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{StoreError, StoredText, TextStore};
use crate::protocol::DocumentId;

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<DocumentId, StoredText>>,
    read_latency_ms: AtomicU64,
    write_latency_ms: AtomicU64,
    fail_writes: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: DocumentId, text: &str) -> Self {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).insert(
            id,
            StoredText {
                content: text.to_string(),
                version: 0,
            },
        );
        self
    }

    /// Every load sleeps this long before reading.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every commit sleeps this long before writing.
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make commits fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of commits that reached the map.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: DocumentId) -> Option<StoredText> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

impl TextStore for MemoryStore {
    fn load_document_text(&self, id: DocumentId) -> Result<StoredText, StoreError> {
        let latency = self.read_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    fn commit_document_text(
        &self,
        id: DocumentId,
        text: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let latency = self.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }

        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = docs.entry(id).or_default();
        if version < entry.version {
            return Ok(());
        }
        entry.content = text.to_string();
        entry.version = version;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_document(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        if docs.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        docs.insert(
            id,
            StoredText {
                content: text.to_string(),
                version: 0,
            },
        );
        Ok(())
    }
}
