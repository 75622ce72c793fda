//! RocksDB-backed document cache.
//!
//! Column families:
//! - `documents` - merged yrs state per document (LZ4 compressed)
//! - `metadata`  - bincode-encoded [`CacheMetadata`]
//!
//! Keys are the document id's UTF-8 bytes.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, IteratorMode, Options,
    SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::cache::{CacheError, LocalCache};
use crate::document::merge_updates;

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_cache"),
            block_cache_size: 32 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Small caches in the given directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// Bookkeeping stored next to each cached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub document_id: String,
    /// Updates folded in since the entry was created
    pub update_count: u64,
    /// Uncompressed state size in bytes
    pub state_size: u64,
    /// Compressed state size in bytes
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl CacheMetadata {
    fn new(document_id: &str) -> Self {
        let now = now_secs();
        Self {
            document_id: document_id.to_string(),
            update_count: 0,
            state_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        Ok(meta)
    }
}

pub struct RocksCache {
    db: DBWithThreadMode<SingleThreaded>,
    config: CacheConfig,
    /// Serializes read-merge-write cycles.
    write_lock: Mutex<()>,
}

impl RocksCache {
    /// Open the cache, creating the database and column families if needed.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)?;
        log::info!("Opened document cache at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &CacheConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are LZ4 frames already.
            CF_DOCUMENTS => opts.set_compression_type(DBCompressionType::None),
            CF_METADATA => opts.optimize_for_point_lookup(config.block_cache_size as u64),
            _ => {}
        }

        opts
    }

    // ─── Document state ───────────────────────────────────────────────

    /// Load the merged state for a document (LZ4 decompressed).
    pub fn load_state(&self, document_id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, document_id.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| CacheError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    /// Fold an update into the stored state and bump the metadata atomically.
    pub fn merge_update(&self, document_id: &str, update: &[u8]) -> Result<CacheMetadata, CacheError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CacheError::Database("cache write lock poisoned".into()))?;

        let merged = match self.load_state(document_id)? {
            Some(existing) => merge_updates(&[existing.as_slice(), update])?,
            None => merge_updates(&[update])?,
        };
        let compressed = lz4_flex::compress_prepend_size(&merged);

        let mut meta = self
            .load_metadata(document_id)?
            .unwrap_or_else(|| CacheMetadata::new(document_id));
        meta.update_count += 1;
        meta.state_size = merged.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, document_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, document_id.as_bytes(), &meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    pub fn document_exists(&self, document_id: &str) -> Result<bool, CacheError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(&cf, document_id.as_bytes())?.is_some())
    }

    pub fn delete_document(&self, document_id: &str) -> Result<(), CacheError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, document_id.as_bytes());
        batch.delete_cf(&cf_meta, document_id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn load_metadata(&self, document_id: &str) -> Result<Option<CacheMetadata>, CacheError> {
        let cf = self.cf(CF_METADATA)?;
        self.db
            .get_cf(&cf, document_id.as_bytes())?
            .map(|bytes| CacheMetadata::decode(&bytes))
            .transpose()
    }

    /// Ids of every cached document.
    pub fn list_documents(&self) -> Result<Vec<String>, CacheError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec()).map_err(|e| CacheError::Serialization(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CacheError::Database(format!("Column family '{name}' not found")))
    }
}

impl LocalCache for RocksCache {
    fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.load_state(document_id)
    }

    fn store_update(&self, document_id: &str, update: &[u8]) -> Result<(), CacheError> {
        self.merge_update(document_id, update).map(|_| ())
    }

    fn remove(&self, document_id: &str) -> Result<(), CacheError> {
        self.delete_document(document_id)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
