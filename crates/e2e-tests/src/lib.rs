//! End-to-end test infrastructure for the memory store.
//!
//! Provides a shared TestHarness wiring the real embedding cache, the
//! HNSW vector store and the memory service around deterministic fake
//! providers, so scenarios run without a model download or network.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use memory_embeddings::{CachedEmbedder, EmbeddingCache, EmbeddingError, EmbeddingProvider};
use memory_service::{MemoryService, NewMemory, SearchOptions};
use memory_types::{Metadata, ProviderKind};
use memory_vector::{HnswConfig, HnswStore};

/// Dimension of the fake embeddings.
pub const FAKE_DIM: usize = 64;

/// Cache capacity used by the harness.
pub const CACHE_CAPACITY: usize = 1_000;

/// Bag-of-words embedder.
///
/// Each lowercase word is hashed (FNV-1a) into one of `FAKE_DIM` buckets.
/// Texts sharing words are close; texts sharing none are orthogonal.
/// Text with no words maps to the bucket of the empty string.
/// The seed separates the local and cloud embedding spaces.
pub struct HashingProvider {
    kind: ProviderKind,
    seed: u64,
    calls: AtomicUsize,
}

impl HashingProvider {
    pub fn new(kind: ProviderKind) -> Self {
        let seed = match kind {
            ProviderKind::Local => 0x00,
            ProviderKind::Cloud => 0x5b,
        };
        Self {
            kind,
            seed,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ self.seed;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % FAKE_DIM as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::Local => "hashing-local",
            ProviderKind::Cloud => "hashing-cloud",
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; FAKE_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
        }
        if vector.iter().all(|x| *x == 0.0) {
            // Text without words still gets a usable direction
            vector[self.bucket("")] = 1.0;
        }
        Ok(vector)
    }
}

/// Shared test harness for E2E tests.
///
/// Owns a temp directory holding the cache file and the vector index.
/// `close` and `restart` simulate process exit and start.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub cache_path: PathBuf,
    pub index_dir: PathBuf,
    pub cache: Arc<EmbeddingCache>,
    pub local: Arc<HashingProvider>,
    pub cloud: Arc<HashingProvider>,
    pub service: MemoryService,
}

impl TestHarness {
    /// Create a harness over a fresh temp directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        Self::reopen(temp_dir)
    }

    /// Open every component over an existing data directory.
    pub fn reopen(temp_dir: tempfile::TempDir) -> Self {
        let cache_path = temp_dir.path().join("embedding-cache.json");
        let index_dir = temp_dir.path().join("vector-index");

        let cache = Arc::new(
            EmbeddingCache::open(&cache_path, CACHE_CAPACITY).expect("Failed to open cache"),
        );
        let local = Arc::new(HashingProvider::new(ProviderKind::Local));
        let cloud = Arc::new(HashingProvider::new(ProviderKind::Cloud));
        let embedder = Arc::new(
            CachedEmbedder::new(Arc::clone(&cache))
                .with_provider(local.clone())
                .with_provider(cloud.clone()),
        );
        let store = HnswStore::open(HnswConfig::new(&index_dir).with_capacity(16))
            .expect("Failed to open vector store");
        let service = MemoryService::new(embedder, Arc::new(store));

        Self {
            _temp_dir: temp_dir,
            cache_path,
            index_dir,
            cache,
            local,
            cloud,
            service,
        }
    }

    /// Drop every component, returning the data directory.
    ///
    /// Dropping the last cache handle runs the final flush; dropping the
    /// store releases the RocksDB lock.
    pub fn close(self) -> tempfile::TempDir {
        let Self {
            _temp_dir,
            cache,
            service,
            ..
        } = self;
        drop(service);
        drop(cache);
        _temp_dir
    }

    /// Close and reopen from disk, the way a new process would.
    ///
    /// Providers come back with zero call counts.
    pub fn restart(self) -> Self {
        Self::reopen(self.close())
    }

    /// Store plain content with the cloud provider, returning its id.
    pub async fn store(&self, content: &str) -> String {
        self.service
            .store(NewMemory::new(content), ProviderKind::Cloud)
            .await
            .expect("Failed to store memory")
    }

    /// Store content with metadata using `provider`.
    pub async fn store_with(
        &self,
        content: &str,
        metadata: Metadata,
        provider: ProviderKind,
    ) -> String {
        self.service
            .store(NewMemory::new(content).with_metadata(metadata), provider)
            .await
            .expect("Failed to store memory")
    }

    /// Ids of results for `query`, nearest first.
    pub async fn search_ids(&self, query: &str, limit: usize, threshold: f32) -> Vec<String> {
        let options = SearchOptions::default()
            .with_limit(limit)
            .with_threshold(threshold)
            .with_provider(ProviderKind::Cloud);
        self.service
            .search(query, &options)
            .await
            .expect("Search failed")
            .into_iter()
            .map(|r| r.id)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Four texts on unrelated topics.
pub fn sample_corpus() -> Vec<&'static str> {
    vec![
        "hello world",
        "rust borrow checker keeps memory safe",
        "python web frameworks ship fast",
        "sql query planner indexes tables",
    ]
}

/// Build a metadata map from key/value pairs.
pub fn metadata(pairs: &[(&str, serde_json::Value)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
