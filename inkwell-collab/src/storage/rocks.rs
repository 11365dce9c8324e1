//! RocksDB-backed document text store.
//!
//! Column families:
//! - `documents` — materialized text (LZ4 compressed)
//! - `metadata`  — bincode-encoded [`DocumentMetadata`] (version, sizes, timestamps)
//!
//! Both are written through one `WriteBatch` per commit, so a crash leaves
//! either the old text and version or the new ones, never a mix. Commits
//! read the stored version before writing; `commit_lock` keeps that
//! read-check-write step atomic across the blocking threads that call in.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::{StoreError, StoredText, TextStore};
use crate::protocol::DocumentId;

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every commit (default: true, commits are infrequent)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inkwell_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-document record stored next to the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: DocumentId,
    /// Version of the stored text (monotonically increasing)
    pub version: u64,
    /// Uncompressed text size in bytes
    pub text_size: u64,
    /// Compressed text size in bytes
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    /// Seconds since epoch
    pub updated_at: u64,
}

impl DocumentMetadata {
    fn new(doc_id: DocumentId) -> Self {
        let now = unix_secs();
        Self {
            doc_id,
            version: 0,
            text_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

/// RocksDB-backed [`TextStore`].
pub struct RocksStore {
    /// RocksDB instance (column families are fixed at open)
    db: DBWithThreadMode<SingleThreaded>,
    /// Held across every read-check-write of a document record.
    commit_lock: Mutex<()>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened document store at {}", config.path.display());

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            config,
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);

        match name {
            // Values are already LZ4 framed by us.
            CF_DOCUMENTS => opts.set_compression_type(DBCompressionType::None),
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }
        opts.optimize_for_point_lookup((config.block_cache_size / (1024 * 1024)) as u64);
        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    fn write_record(
        &self,
        meta: &DocumentMetadata,
        compressed: &[u8],
    ) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let key = doc_key(meta.doc_id);

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, key, compressed);
        batch.put_cf(cf_meta, key, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    pub fn document_exists(&self, doc_id: DocumentId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(cf, doc_key(doc_id))?.is_some())
    }

    pub fn load_metadata(&self, doc_id: DocumentId) -> Result<DocumentMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, doc_key(doc_id))? {
            Some(bytes) => DocumentMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl TextStore for RocksStore {
    fn load_document_text(&self, id: DocumentId) -> Result<StoredText, StoreError> {
        let meta = self.load_metadata(id)?;
        let cf = self.cf(CF_DOCUMENTS)?;
        let compressed = self
            .db
            .get_cf(cf, doc_key(id))?
            .ok_or(StoreError::NotFound(id))?;
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let content =
            String::from_utf8(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(StoredText {
            content,
            version: meta.version,
        })
    }

    fn commit_document_text(
        &self,
        id: DocumentId,
        text: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_commits();
        let mut meta = match self.load_metadata(id) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => DocumentMetadata::new(id),
            Err(e) => return Err(e),
        };
        if version < meta.version {
            log::warn!(
                "Skipping stale commit for doc {id}: version {version} < stored {}",
                meta.version
            );
            return Ok(());
        }

        let compressed = lz4_flex::compress_prepend_size(text.as_bytes());
        meta.version = version;
        meta.text_size = text.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = unix_secs();
        self.write_record(&meta, &compressed)?;

        log::debug!("Committed doc {id} at version {version} ({} bytes)", text.len());
        Ok(())
    }

    fn create_document(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        let _guard = self.lock_commits();
        if self.document_exists(id)? {
            return Err(StoreError::AlreadyExists(id));
        }
        let compressed = lz4_flex::compress_prepend_size(text.as_bytes());
        let mut meta = DocumentMetadata::new(id);
        meta.text_size = text.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        self.write_record(&meta, &compressed)
    }
}

fn doc_key(id: DocumentId) -> [u8; 8] {
    id.to_be_bytes()
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
