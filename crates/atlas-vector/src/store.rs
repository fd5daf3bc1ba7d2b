//! Search record storage.
//!
//! The index talks to storage only through [`RecordStore`]. Two
//! implementations ship here: RocksDB for persistence and an in-memory
//! vector for tests and throwaway indexes.
//!
//! RocksDB layout:
//! - `search_rows`: big-endian id -> JSON scalar columns
//! - `search_embeddings`: big-endian id -> little-endian f32 blob
//!
//! Both column families are written in one `WriteBatch`, so a row is
//! never visible without its embedding.

use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VectorError;

/// Column family holding scalar columns
pub const CF_SEARCH_ROWS: &str = "search_rows";

/// Column family holding embedding blobs
pub const CF_SEARCH_EMBEDDINGS: &str = "search_embeddings";

/// A record before storage has assigned its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub embedding: Vec<f32>,
}

/// A stored record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    /// Assigned by storage, increasing in insertion order
    pub id: u64,
    pub text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub embedding: Vec<f32>,
}

impl SearchRecord {
    fn from_new(id: u64, record: NewRecord) -> Self {
        Self {
            id,
            text: record.text,
            latitude: record.latitude,
            longitude: record.longitude,
            embedding: record.embedding,
        }
    }
}

/// Storage collaborator for the search index.
///
/// Implementations serialize physical access themselves; the index calls
/// them concurrently from blocking tasks.
pub trait RecordStore: Send + Sync {
    /// Persist `record` and return it with its assigned id.
    fn append(&self, record: NewRecord) -> Result<SearchRecord, VectorError>;

    /// Every record in id (insertion) order.
    fn scan(&self) -> Result<Vec<SearchRecord>, VectorError>;

    fn len(&self) -> Result<usize, VectorError>;

    fn is_empty(&self) -> Result<bool, VectorError> {
        Ok(self.len()? == 0)
    }

    /// Remove every record. Ids are not reused within the process.
    fn clear(&self) -> Result<(), VectorError>;
}

/// Scalar columns as stored in `search_rows`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    text: String,
    latitude: f64,
    longitude: f64,
    dimension: usize,
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(id: u64, bytes: &[u8], dimension: usize) -> Result<Vec<f32>, VectorError> {
    if bytes.len() != dimension * 4 {
        return Err(VectorError::CorruptRecord {
            id,
            reason: format!(
                "embedding blob is {} bytes, expected {}",
                bytes.len(),
                dimension * 4
            ),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_key(key: &[u8]) -> Result<u64, VectorError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| VectorError::Storage(format!("malformed key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// RocksDB-backed record store.
pub struct RocksRecordStore {
    db: DB,
    /// Next id to assign; held across the batch write so ids follow commit order
    next_id: Mutex<u64>,
}

impl RocksRecordStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_SEARCH_ROWS, CF_SEARCH_EMBEDDINGS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let next_id = {
            let cf = db
                .cf_handle(CF_SEARCH_ROWS)
                .ok_or_else(|| VectorError::Storage(format!("missing column family {}", CF_SEARCH_ROWS)))?;
            match db.iterator_cf(cf, IteratorMode::End).next() {
                Some(item) => decode_key(&item?.0)? + 1,
                None => 1,
            }
        };

        info!(path = ?path, next_id, "Opened search record store");
        Ok(Self {
            db,
            next_id: Mutex::new(next_id),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, VectorError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| VectorError::Storage(format!("missing column family {}", name)))
    }
}

impl RecordStore for RocksRecordStore {
    fn append(&self, record: NewRecord) -> Result<SearchRecord, VectorError> {
        let rows = self.cf(CF_SEARCH_ROWS)?;
        let embeddings = self.cf(CF_SEARCH_EMBEDDINGS)?;

        let row = serde_json::to_vec(&StoredRow {
            text: record.text.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            dimension: record.embedding.len(),
        })?;
        let blob = encode_embedding(&record.embedding);

        let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next_id;
        let key = id.to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(rows, key, row);
        batch.put_cf(embeddings, key, blob);
        self.db.write(batch)?;
        *next_id += 1;

        debug!(id, "Stored search record");
        Ok(SearchRecord::from_new(id, record))
    }

    fn scan(&self) -> Result<Vec<SearchRecord>, VectorError> {
        let rows = self.cf(CF_SEARCH_ROWS)?;
        let embeddings = self.cf(CF_SEARCH_EMBEDDINGS)?;

        let mut records = Vec::new();
        for item in self.db.iterator_cf(rows, IteratorMode::Start) {
            let (key, value) = item?;
            let id = decode_key(&key)?;
            let row: StoredRow = serde_json::from_slice(&value)?;
            let blob = self
                .db
                .get_pinned_cf(embeddings, &key)?
                .ok_or_else(|| VectorError::CorruptRecord {
                    id,
                    reason: "missing embedding".to_string(),
                })?;

            records.push(SearchRecord {
                id,
                embedding: decode_embedding(id, &blob, row.dimension)?,
                text: row.text,
                latitude: row.latitude,
                longitude: row.longitude,
            });
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, VectorError> {
        let rows = self.cf(CF_SEARCH_ROWS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(rows, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn clear(&self) -> Result<(), VectorError> {
        let rows = self.cf(CF_SEARCH_ROWS)?;
        let embeddings = self.cf(CF_SEARCH_EMBEDDINGS)?;

        let _guard = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;
        for item in self.db.iterator_cf(rows, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(rows, &key);
            batch.delete_cf(embeddings, &key);
            removed += 1;
        }
        self.db.write(batch)?;

        debug!(removed, "Cleared search records");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<SearchRecord>,
    last_id: u64,
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, record: NewRecord) -> Result<SearchRecord, VectorError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last_id += 1;
        let stored = SearchRecord::from_new(inner.last_id, record);
        inner.records.push(stored.clone());
        Ok(stored)
    }

    fn scan(&self) -> Result<Vec<SearchRecord>, VectorError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.records.clone())
    }

    fn len(&self) -> Result<usize, VectorError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.records.len())
    }

    fn clear(&self) -> Result<(), VectorError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.records.clear();
        Ok(())
    }
}
