//! Record storage for the HNSW store.
//!
//! The usearch index only knows `u64` keys. RocksDB holds everything else:
//! - `records`: record id -> [`RecordEntry`] (JSON)
//! - `vector_keys`: big-endian `u64` key -> record id
//! - default CF: `dimension` and `next_key`
//!
//! Mutations go through [`RecordWrite`], which commits as one atomic batch.

use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use memory_types::Metadata;

use crate::error::VectorError;

/// Column family of record entries, keyed by record id
pub const CF_RECORDS: &str = "records";

/// Column family mapping index keys back to record ids
pub const CF_VECTOR_KEYS: &str = "vector_keys";

const KEY_DIMENSION: &[u8] = b"dimension";
const KEY_NEXT_KEY: &[u8] = b"next_key";

/// Stored form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Key of the vector in the usearch index
    pub vector_key: u64,
    pub document: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Copy of the vector, used to rebuild a missing index
    pub embedding: Vec<f32>,
    /// Milliseconds since epoch
    pub created_at: i64,
}

/// RocksDB-backed record database.
pub struct RecordDb {
    db: DB,
}

impl RecordDb {
    /// Open or create the record database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_RECORDS, Options::default()),
            ColumnFamilyDescriptor::new(CF_VECTOR_KEYS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        info!(path = ?path, "Opened record database");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, VectorError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| VectorError::Index(format!("column family {name} missing")))
    }

    pub fn get(&self, id: &str) -> Result<Option<RecordEntry>, VectorError> {
        match self.db.get_cf(self.cf(CF_RECORDS)?, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve an index key to its record.
    pub fn get_by_key(&self, key: u64) -> Result<Option<(String, RecordEntry)>, VectorError> {
        let Some(id_bytes) = self.db.get_cf(self.cf(CF_VECTOR_KEYS)?, key.to_be_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8(id_bytes)
            .map_err(|e| VectorError::Serialization(format!("record id: {e}")))?;
        Ok(self.get(&id)?.map(|entry| (id, entry)))
    }

    pub fn ids(&self) -> Result<Vec<String>, VectorError> {
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_RECORDS)?, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(
                String::from_utf8(key.to_vec())
                    .map_err(|e| VectorError::Serialization(format!("record id: {e}")))?,
            );
        }
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize, VectorError> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf(CF_RECORDS)?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// All records. Use with caution on large stores.
    pub fn entries(&self) -> Result<Vec<(String, RecordEntry)>, VectorError> {
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_RECORDS)?, IteratorMode::Start) {
            let (key, value) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| VectorError::Serialization(format!("record id: {e}")))?;
            entries.push((id, serde_json::from_slice(&value)?));
        }
        Ok(entries)
    }

    /// Dimension fixed by the first upsert.
    pub fn dimension(&self) -> Result<Option<usize>, VectorError> {
        Ok(self.read_u64(KEY_DIMENSION)?.map(|d| d as usize))
    }

    /// Next unused index key. Keys start at 1.
    pub fn next_key(&self) -> Result<u64, VectorError> {
        Ok(self.read_u64(KEY_NEXT_KEY)?.unwrap_or(1))
    }

    fn read_u64(&self, key: &[u8]) -> Result<Option<u64>, VectorError> {
        match self.db.get(key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    VectorError::Serialization(format!(
                        "{} is not a u64",
                        String::from_utf8_lossy(key)
                    ))
                })?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Start an atomic batch of mutations.
    pub fn write(&self) -> RecordWrite<'_> {
        RecordWrite {
            db: self,
            batch: WriteBatch::default(),
        }
    }
}

/// Pending mutations, applied atomically by [`RecordWrite::commit`].
pub struct RecordWrite<'a> {
    db: &'a RecordDb,
    batch: WriteBatch,
}

impl RecordWrite<'_> {
    pub fn put(&mut self, id: &str, entry: &RecordEntry) -> Result<(), VectorError> {
        let value = serde_json::to_vec(entry)?;
        self.batch
            .put_cf(self.db.cf(CF_RECORDS)?, id.as_bytes(), value);
        self.batch.put_cf(
            self.db.cf(CF_VECTOR_KEYS)?,
            entry.vector_key.to_be_bytes(),
            id.as_bytes(),
        );
        Ok(())
    }

    /// Remove a record and its key mapping.
    pub fn remove(&mut self, id: &str, vector_key: u64) -> Result<(), VectorError> {
        self.batch.delete_cf(self.db.cf(CF_RECORDS)?, id.as_bytes());
        self.drop_key(vector_key)
    }

    /// Remove only the key mapping (the record is being re-keyed).
    pub fn drop_key(&mut self, vector_key: u64) -> Result<(), VectorError> {
        self.batch
            .delete_cf(self.db.cf(CF_VECTOR_KEYS)?, vector_key.to_be_bytes());
        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: usize) {
        self.batch
            .put(KEY_DIMENSION, (dimension as u64).to_be_bytes());
    }

    pub fn set_next_key(&mut self, next_key: u64) {
        self.batch.put(KEY_NEXT_KEY, next_key.to_be_bytes());
    }

    pub fn commit(self) -> Result<(), VectorError> {
        let ops = self.batch.len();
        self.db.db.write(self.batch)?;
        debug!(ops, "Committed record batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(key: u64, document: &str) -> RecordEntry {
        RecordEntry {
            vector_key: key,
            document: document.to_string(),
            metadata: Metadata::new(),
            embedding: vec![1.0, 0.0],
            created_at: 1705320000000,
        }
    }

    #[test]
    fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let db = RecordDb::open(temp.path()).unwrap();

        let mut stored = entry(7, "hello world");
        stored.metadata.insert("topic".to_string(), json!("greeting"));

        let mut write = db.write();
        write.put("abc", &stored).unwrap();
        write.commit().unwrap();

        assert_eq!(db.get("abc").unwrap(), Some(stored.clone()));
        let (id, by_key) = db.get_by_key(7).unwrap().unwrap();
        assert_eq!(id, "abc");
        assert_eq!(by_key, stored);
        assert!(db.get("missing").unwrap().is_none());
        assert!(db.get_by_key(8).unwrap().is_none());
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let db = RecordDb::open(temp.path()).unwrap();

        let mut write = db.write();
        write.put("a", &entry(1, "one")).unwrap();
        write.put("b", &entry(2, "two")).unwrap();
        write.commit().unwrap();
        assert_eq!(db.count().unwrap(), 2);

        let mut write = db.write();
        write.remove("a", 1).unwrap();
        write.commit().unwrap();

        assert_eq!(db.ids().unwrap(), vec!["b".to_string()]);
        assert!(db.get_by_key(1).unwrap().is_none());
    }

    #[test]
    fn test_counters() {
        let temp = TempDir::new().unwrap();
        let db = RecordDb::open(temp.path()).unwrap();

        assert_eq!(db.dimension().unwrap(), None);
        assert_eq!(db.next_key().unwrap(), 1);

        let mut write = db.write();
        write.set_dimension(384);
        write.set_next_key(43);
        write.commit().unwrap();

        assert_eq!(db.dimension().unwrap(), Some(384));
        assert_eq!(db.next_key().unwrap(), 43);
    }

    #[test]
    fn test_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let db = RecordDb::open(temp.path()).unwrap();
            let mut write = db.write();
            write.put("a", &entry(1, "one")).unwrap();
            write.set_next_key(2);
            write.commit().unwrap();
        }

        let db = RecordDb::open(temp.path()).unwrap();
        assert_eq!(db.entries().unwrap().len(), 1);
        assert_eq!(db.next_key().unwrap(), 2);
    }
}
