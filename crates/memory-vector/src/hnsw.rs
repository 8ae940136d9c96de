//! HNSW store using usearch, with records in RocksDB.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)
//!
//! The index dimension is not configured: the first upsert fixes it and
//! every later vector must match.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use memory_types::{MemoryRecord, MetadataFilter, VectorSettings};

use crate::error::VectorError;
use crate::records::{RecordDb, RecordEntry};
use crate::store::{dedup_last_wins, validate_records, Hit, QueryRequest, QueryResponse, VectorStore};

const INDEX_FILE: &str = "hnsw.usearch";
const RECORDS_DIR: &str = "records";

/// HNSW store configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Directory holding `hnsw.usearch` and the `records` database
    pub index_dir: PathBuf,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Slots reserved up front; the index doubles when full
    pub initial_capacity: usize,
}

impl HnswConfig {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self::from_settings(&VectorSettings::default(), index_dir)
    }

    pub fn from_settings(settings: &VectorSettings, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            connectivity: settings.connectivity,
            expansion_add: settings.expansion_add,
            expansion_search: settings.expansion_search,
            initial_capacity: settings.initial_capacity,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    fn options(&self, dimensions: usize) -> IndexOptions {
        IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }
}

/// Index plus the counters that must change together with it.
struct IndexState {
    /// `None` until the first record fixes the dimension
    index: Option<Index>,
    dimension: Option<usize>,
    next_key: u64,
}

/// Persistent approximate store.
pub struct HnswStore {
    config: HnswConfig,
    records: RecordDb,
    state: RwLock<IndexState>,
}

impl HnswStore {
    /// Open the store in `config.index_dir`, creating it if needed.
    ///
    /// A missing or unreadable index file is rebuilt from the stored
    /// records.
    pub fn open(config: HnswConfig) -> Result<Self, VectorError> {
        fs::create_dir_all(&config.index_dir)?;
        let records = RecordDb::open(config.index_dir.join(RECORDS_DIR))?;

        let dimension = records.dimension()?;
        let next_key = records.next_key()?;

        let index = match dimension {
            Some(dim) => Some(open_index(&config, &records, dim)?),
            None => None,
        };

        info!(
            path = ?config.index_dir,
            dim = ?dimension,
            vectors = index.as_ref().map(Index::size).unwrap_or(0),
            "Opened HNSW store"
        );

        Ok(Self {
            config,
            records,
            state: RwLock::new(IndexState {
                index,
                dimension,
                next_key,
            }),
        })
    }

    /// Path of the usearch index file
    pub fn index_file(&self) -> PathBuf {
        self.config.index_dir.join(INDEX_FILE)
    }

    pub fn records(&self) -> &RecordDb {
        &self.records
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the index and commit the matching record batch.
    fn apply_upsert(
        &self,
        state: &mut IndexState,
        records: &[&MemoryRecord],
        dimension: usize,
    ) -> Result<(), VectorError> {
        let mut write = self.records.write();
        if state.index.is_none() {
            let index = new_index(&self.config, dimension)?;
            info!(dim = dimension, "Created vector index");
            state.index = Some(index);
            state.dimension = Some(dimension);
            write.set_dimension(dimension);
        }

        let index = state
            .index
            .as_ref()
            .ok_or_else(|| VectorError::Index("index not initialized".to_string()))?;
        ensure_capacity(index, records.len())?;

        let now = Utc::now().timestamp_millis();
        for record in records {
            let created_at = match self.records.get(&record.id)? {
                Some(old) => {
                    index
                        .remove(old.vector_key)
                        .map_err(|e| VectorError::Index(e.to_string()))?;
                    write.drop_key(old.vector_key)?;
                    old.created_at
                }
                None => now,
            };

            // Keys are never reused, even when a later step fails
            let key = state.next_key;
            state.next_key += 1;
            index
                .add(key, record.embedding.as_slice())
                .map_err(|e| VectorError::Index(e.to_string()))?;

            write.put(
                &record.id,
                &RecordEntry {
                    vector_key: key,
                    document: record.document.clone(),
                    metadata: record.metadata.clone(),
                    embedding: record.embedding.clone(),
                    created_at,
                },
            )?;
            debug!(id = %record.id, key, "Upserted record");
        }

        write.set_next_key(state.next_key);
        write.commit()
    }

    /// Remove `ids` from the index and commit the record batch. Returns
    /// how many existed.
    fn apply_delete(&self, state: &IndexState, ids: &[String]) -> Result<usize, VectorError> {
        let mut write = self.records.write();
        let mut removed = 0usize;

        for id in ids {
            let Some(entry) = self.records.get(id)? else {
                continue;
            };
            if let Some(index) = &state.index {
                index
                    .remove(entry.vector_key)
                    .map_err(|e| VectorError::Index(e.to_string()))?;
            }
            write.remove(id, entry.vector_key)?;
            removed += 1;
        }

        if removed > 0 {
            write.commit()?;
        }
        Ok(removed)
    }

    /// Rebuild the in-memory index from committed records after a failed
    /// mutation. `next_key` is left as is so no key is handed out twice.
    fn resync(&self, state: &mut IndexState) {
        let rebuilt = self.records.dimension().and_then(|dimension| match dimension {
            Some(dim) => {
                let entries = self.records.entries()?;
                rebuild_index(&self.config, dim, &entries).map(|index| (Some(index), Some(dim)))
            }
            None => Ok((None, None)),
        });

        match rebuilt {
            Ok((index, dimension)) => {
                warn!(
                    vectors = index.as_ref().map(Index::size).unwrap_or(0),
                    "Vector index resynced with records after failed write"
                );
                state.index = index;
                state.dimension = dimension;
            }
            Err(e) => warn!(error = %e, "Could not resync vector index with records"),
        }
    }

    fn search_row(
        &self,
        index: &Index,
        query: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Hit>, VectorError> {
        let k = n_results.min(index.size());
        if k == 0 {
            return Ok(Vec::new());
        }

        let matches = match filter {
            None => index.search(query, k),
            Some(filter) => index.filtered_search(query, k, |key| {
                // Lookup failures exclude the candidate
                matches!(
                    self.records.get_by_key(key),
                    Ok(Some((_, entry))) if filter.matches(&entry.metadata)
                )
            }),
        }
        .map_err(|e| VectorError::Index(e.to_string()))?;

        let mut hits = Vec::with_capacity(matches.keys.len());
        for (&key, &distance) in matches.keys.iter().zip(matches.distances.iter()) {
            match self.records.get_by_key(key)? {
                Some((id, entry)) => hits.push(Hit {
                    id,
                    document: entry.document,
                    metadata: entry.metadata,
                    distance,
                }),
                None => warn!(key, "Index key has no record, skipping"),
            }
        }
        Ok(hits)
    }
}

impl VectorStore for HnswStore {
    fn upsert(&self, records: &[MemoryRecord]) -> Result<(), VectorError> {
        validate_records(records)?;
        let records = dedup_last_wins(records);
        let Some(first) = records.first() else {
            return Ok(());
        };

        let mut guard = self.write();
        let state = &mut *guard;
        let dimension = state.dimension.unwrap_or(first.dimension());
        if let Some(bad) = records.iter().find(|r| r.dimension() != dimension) {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: bad.dimension(),
            });
        }

        if let Err(e) = self.apply_upsert(state, &records, dimension) {
            self.resync(state);
            return Err(e);
        }
        match &state.index {
            Some(index) => save_index(index, &self.index_file()),
            None => Ok(()),
        }
    }

    fn query(&self, request: &QueryRequest) -> Result<QueryResponse, VectorError> {
        let state = self.read();
        let mut rows = Vec::with_capacity(request.embeddings.len());

        for query in &request.embeddings {
            let row = match (&state.index, state.dimension) {
                (Some(index), Some(dimension)) => {
                    if query.len() != dimension {
                        return Err(VectorError::DimensionMismatch {
                            expected: dimension,
                            actual: query.len(),
                        });
                    }
                    self.search_row(index, query, request.n_results, request.filter.as_ref())?
                }
                // Nothing stored yet
                _ => Vec::new(),
            };
            rows.push(row);
        }

        debug!(
            queries = rows.len(),
            n_results = request.n_results,
            filtered = request.filter.is_some(),
            "Query complete"
        );
        Ok(QueryResponse::from_rows(request.include, rows))
    }

    fn delete(&self, ids: &[String]) -> Result<(), VectorError> {
        let mut guard = self.write();
        let state = &mut *guard;

        let removed = match self.apply_delete(state, ids) {
            Ok(removed) => removed,
            Err(e) => {
                self.resync(state);
                return Err(e);
            }
        };
        if removed == 0 {
            return Ok(());
        }

        if let Some(index) = &state.index {
            save_index(index, &self.index_file())?;
        }
        debug!(requested = ids.len(), removed, "Deleted records");
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, VectorError> {
        self.records.ids()
    }

    fn count(&self) -> Result<usize, VectorError> {
        self.records.count()
    }

    fn dimension(&self) -> Option<usize> {
        self.read().dimension
    }
}

fn new_index(config: &HnswConfig, dimension: usize) -> Result<Index, VectorError> {
    let index = Index::new(&config.options(dimension)).map_err(|e| VectorError::Index(e.to_string()))?;
    index
        .reserve(config.initial_capacity)
        .map_err(|e| VectorError::Index(e.to_string()))?;
    Ok(index)
}

/// Load the index file, or rebuild it from records when it is missing,
/// unreadable or out of step with the database.
fn open_index(config: &HnswConfig, records: &RecordDb, dimension: usize) -> Result<Index, VectorError> {
    let path = config.index_dir.join(INDEX_FILE);
    let entries = records.entries()?;

    if path.exists() {
        let index = Index::new(&config.options(dimension)).map_err(|e| VectorError::Index(e.to_string()))?;
        match index.load(path_str(&path)?) {
            Ok(()) if in_step(&index, &entries) => {
                info!(path = ?path, vectors = entries.len(), "Loaded vector index");
                return Ok(index);
            }
            Ok(()) => warn!(
                path = ?path,
                indexed = index.size(),
                records = entries.len(),
                "Vector index out of step with records, rebuilding"
            ),
            Err(e) => warn!(path = ?path, error = %e, "Vector index unreadable, rebuilding"),
        }
    }

    let index = rebuild_index(config, dimension, &entries)?;
    save_index(&index, &path)?;
    info!(path = ?path, vectors = index.size(), "Rebuilt vector index");
    Ok(index)
}

/// True when the index holds exactly the keys the records point at.
///
/// Equal sizes alone are not enough: replacing an id keeps the count but
/// moves it to a new key.
fn in_step(index: &Index, entries: &[(String, RecordEntry)]) -> bool {
    index.size() == entries.len() && entries.iter().all(|(_, entry)| index.contains(entry.vector_key))
}

fn rebuild_index(
    config: &HnswConfig,
    dimension: usize,
    entries: &[(String, RecordEntry)],
) -> Result<Index, VectorError> {
    let index = new_index(config, dimension)?;
    ensure_capacity(&index, entries.len())?;
    for (id, entry) in entries {
        if entry.embedding.len() != dimension {
            warn!(id = %id, "Stored embedding has wrong dimension, skipping");
            continue;
        }
        index
            .add(entry.vector_key, entry.embedding.as_slice())
            .map_err(|e| VectorError::Index(e.to_string()))?;
    }
    Ok(index)
}

/// Grow by doubling until `additional` more vectors fit.
fn ensure_capacity(index: &Index, additional: usize) -> Result<(), VectorError> {
    let needed = index.size() + additional;
    let mut capacity = index.capacity().max(1);
    if needed <= capacity {
        return Ok(());
    }
    while capacity < needed {
        capacity *= 2;
    }
    debug!(capacity, "Growing vector index");
    index
        .reserve(capacity)
        .map_err(|e| VectorError::Index(e.to_string()))
}

/// Save via a temp file and rename so a crash never leaves a torn index.
fn save_index(index: &Index, path: &Path) -> Result<(), VectorError> {
    let tmp = path.with_extension("usearch.tmp");
    index
        .save(path_str(&tmp)?)
        .map_err(|e| VectorError::Index(format!("Failed to save: {}", e)))?;
    fs::rename(&tmp, path)?;
    debug!(path = ?path, vectors = index.size(), "Saved vector index");
    Ok(())
}

fn path_str(path: &Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::Index("Invalid path encoding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_types::Metadata;
    use serde_json::json;
    use tempfile::TempDir;

    fn random_vector(dim: usize) -> Vec<f32> {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..dim).map(|_| rng.random::<f32>() - 0.5).collect()
    }

    fn open(temp: &TempDir) -> HnswStore {
        HnswStore::open(HnswConfig::new(temp.path()).with_capacity(4)).unwrap()
    }

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_empty_store() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.dimension(), None);

        let response = store.query(&QueryRequest::new(vec![1.0, 0.0], 5)).unwrap();
        assert_eq!(response.ids, vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_upsert_and_query_nearest_first() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store
            .upsert(&[
                MemoryRecord::new("x", axis(8, 0), "x axis"),
                MemoryRecord::new("y", axis(8, 1), "y axis"),
                MemoryRecord::new("xy", vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "diagonal"),
            ])
            .unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.dimension(), Some(8));

        let response = store.query(&QueryRequest::new(axis(8, 0), 3)).unwrap();
        let ids = &response.ids[0];
        assert_eq!(ids[0], "x");
        assert_eq!(ids[1], "xy");

        let distances = &response.distances.unwrap()[0];
        assert!(distances[0].abs() < 1e-4);
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(response.documents.unwrap()[0][0], "x axis");
    }

    #[test]
    fn test_upsert_replaces_existing_id() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store.upsert(&[MemoryRecord::new("a", axis(4, 0), "old")]).unwrap();
        store.upsert(&[MemoryRecord::new("a", axis(4, 1), "new")]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let response = store.query(&QueryRequest::new(axis(4, 1), 5)).unwrap();
        assert_eq!(response.ids[0], vec!["a".to_string()]);
        assert_eq!(response.documents.unwrap()[0][0], "new");
        assert!(response.distances.unwrap()[0][0].abs() < 1e-4);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.upsert(&[MemoryRecord::new("a", random_vector(16), "a")]).unwrap();

        let err = store
            .upsert(&[MemoryRecord::new("b", random_vector(8), "b")])
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch { expected: 16, actual: 8 }
        ));

        let err = store.query(&QueryRequest::new(random_vector(8), 1)).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .upsert(&[
                MemoryRecord::new("a", random_vector(8), "a"),
                MemoryRecord::new("b", random_vector(8), "b"),
            ])
            .unwrap();

        store.delete(&["a".to_string(), "missing".to_string()]).unwrap();
        store.delete(&["a".to_string()]).unwrap();
        assert_eq!(store.ids().unwrap(), vec!["b".to_string()]);

        let response = store.query(&QueryRequest::new(random_vector(8), 5)).unwrap();
        assert_eq!(response.ids[0], vec!["b".to_string()]);
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        let records: Vec<_> = (0..20)
            .map(|i| MemoryRecord::new(format!("r{i}"), random_vector(8), "doc"))
            .collect();
        store.upsert(&records[..10]).unwrap();
        store.upsert(&records[10..]).unwrap();
        assert_eq!(store.count().unwrap(), 20);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            store
                .upsert(&[
                    MemoryRecord::new("x", axis(4, 0), "x axis"),
                    MemoryRecord::new("y", axis(4, 1), "y axis"),
                ])
                .unwrap();
        }

        let store = open(&temp);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.dimension(), Some(4));
        let response = store.query(&QueryRequest::new(axis(4, 1), 1)).unwrap();
        assert_eq!(response.ids[0], vec!["y".to_string()]);

        // Keys keep increasing after reopen
        store.upsert(&[MemoryRecord::new("z", axis(4, 2), "z axis")]).unwrap();
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_rebuilds_missing_index_file() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            store
                .upsert(&[
                    MemoryRecord::new("x", axis(4, 0), "x axis"),
                    MemoryRecord::new("y", axis(4, 1), "y axis"),
                ])
                .unwrap();
            fs::remove_file(store.index_file()).unwrap();
        }

        let store = open(&temp);
        let response = store.query(&QueryRequest::new(axis(4, 0), 2)).unwrap();
        assert_eq!(response.ids[0][0], "x");
        assert_eq!(response.ids[0].len(), 2);
    }

    #[test]
    fn test_stale_index_file_after_replace_is_rebuilt() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("stale.usearch");
        {
            let store = open(&temp);
            store
                .upsert(&[
                    MemoryRecord::new("a", axis(3, 0), "a first"),
                    MemoryRecord::new("b", axis(3, 2), "b"),
                ])
                .unwrap();
            fs::copy(store.index_file(), &stale).unwrap();

            // Same record count, but "a" moves to a new key
            store
                .upsert(&[MemoryRecord::new("a", axis(3, 1), "a moved")])
                .unwrap();
        }
        // Index file as it was before the replace reached disk
        fs::copy(&stale, temp.path().join(INDEX_FILE)).unwrap();

        let store = open(&temp);
        let response = store.query(&QueryRequest::new(axis(3, 1), 1)).unwrap();
        assert_eq!(response.ids, vec![vec!["a".to_string()]]);
        assert_eq!(
            response.documents,
            Some(vec![vec!["a moved".to_string()]])
        );
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_in_step_checks_keys_not_just_size() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .upsert(&[
                MemoryRecord::new("a", axis(3, 0), "a"),
                MemoryRecord::new("b", axis(3, 2), "b"),
            ])
            .unwrap();
        let entries = store.records().entries().unwrap();

        let state = store.read();
        let index = state.index.as_ref().unwrap();
        assert!(in_step(index, &entries));

        let other = rebuild_index(&store.config, 3, &entries).unwrap();
        other.remove(entries[0].1.vector_key).unwrap();
        other.add(999, axis(3, 1).as_slice()).unwrap();
        assert_eq!(other.size(), entries.len());
        assert!(!in_step(&other, &entries));
    }

    #[test]
    fn test_resync_restores_committed_state() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .upsert(&[
                MemoryRecord::new("a", axis(3, 0), "a"),
                MemoryRecord::new("b", axis(3, 2), "b"),
            ])
            .unwrap();
        let entries = store.records().entries().unwrap();
        let next_key = store.read().next_key;

        {
            // Index changed, record batch never committed
            let mut guard = store.write();
            let state = &mut *guard;
            let index = state.index.as_ref().unwrap();
            index.remove(entries[0].1.vector_key).unwrap();
            index.add(state.next_key, axis(3, 1).as_slice()).unwrap();
            state.next_key += 1;
            assert!(!in_step(index, &entries));

            store.resync(state);
            assert!(in_step(state.index.as_ref().unwrap(), &entries));
            assert_eq!(state.next_key, next_key + 1);
        }

        let response = store.query(&QueryRequest::new(axis(3, 0), 1)).unwrap();
        assert_eq!(response.ids, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_filtered_query() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        let tagged = |id: &str, v: Vec<f32>, kind: &str| {
            let mut metadata = Metadata::new();
            metadata.insert("kind".to_string(), json!(kind));
            MemoryRecord::new(id, v, id).with_metadata(metadata)
        };
        store
            .upsert(&[
                tagged("a", axis(4, 0), "note"),
                tagged("b", vec![0.9, 0.1, 0.0, 0.0], "task"),
                tagged("c", axis(4, 1), "task"),
            ])
            .unwrap();

        let request = QueryRequest::new(axis(4, 0), 5)
            .with_filter(Some(MetadataFilter::eq("kind", "task")));
        let response = store.query(&request).unwrap();
        assert_eq!(response.ids[0], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(response.metadatas.unwrap()[0][0]["kind"], json!("task"));
    }
}
