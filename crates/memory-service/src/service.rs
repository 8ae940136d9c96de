//! Memory service.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use memory_embeddings::CachedEmbedder;
use memory_types::{HashKey, MemoryRecord, Metadata, MetadataFilter, ProviderKind, SearchResult, SearchSettings};
use memory_vector::{Include, QueryRequest, VectorStore};

use crate::error::ServiceError;
use crate::shaping::shape_results;

/// A memory to be stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Explicit id; defaults to the MD5 of `content`
    #[serde(default)]
    pub id: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Parameters of a search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results
    pub limit: usize,
    /// Minimum similarity; results below it are dropped
    pub threshold: f32,
    /// Embedding provider for the query text
    pub provider: ProviderKind,
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default(), ProviderKind::default())
    }
}

impl SearchOptions {
    pub fn from_settings(settings: &SearchSettings, provider: ProviderKind) -> Self {
        Self {
            limit: settings.limit,
            threshold: settings.threshold,
            provider,
            filter: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }
}

/// Stores and retrieves memories by meaning.
///
/// Cheap to share behind `Arc`; all state lives in the embedder and store.
pub struct MemoryService {
    embedder: Arc<CachedEmbedder>,
    store: Arc<dyn VectorStore>,
}

impl MemoryService {
    pub fn new(embedder: Arc<CachedEmbedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &Arc<CachedEmbedder> {
        &self.embedder
    }

    pub fn store_backend(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed and store a memory, returning its id.
    ///
    /// Storing identical content twice without an explicit id overwrites
    /// the same record.
    pub async fn store(&self, memory: NewMemory, provider: ProviderKind) -> Result<String, ServiceError> {
        let id = match memory.id {
            Some(id) if id.is_empty() => {
                return Err(ServiceError::InvalidInput("id is empty".to_string()));
            }
            Some(id) => id,
            None => HashKey::of(&memory.content).into_string(),
        };

        let embedding = self.embedder.embed(&memory.content, provider).await?;
        let record = MemoryRecord::new(id.clone(), embedding, memory.content)
            .with_metadata(memory.metadata.unwrap_or_default());
        self.store.upsert(&[record])?;

        info!(id = %id, provider = %provider, "Stored memory");
        Ok(id)
    }

    /// Memories most similar to `query`.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>, ServiceError> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query, options.provider).await?;
        let results = self.search_by_embedding(embedding, options)?;
        debug!(
            query_len = query.len(),
            limit = options.limit,
            threshold = options.threshold,
            results = results.len(),
            "Search complete"
        );
        Ok(results)
    }

    /// Memories most similar to a precomputed vector. `options.provider` is
    /// ignored.
    pub fn search_by_embedding(
        &self,
        embedding: Vec<f32>,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, ServiceError> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        if embedding.is_empty() {
            return Err(ServiceError::InvalidInput("query embedding is empty".to_string()));
        }

        let request = QueryRequest::new(embedding, options.limit)
            .with_filter(options.filter.clone())
            .with_include(Include::all());
        let response = self.store.query(&request)?;
        Ok(shape_results(response, options.threshold))
    }

    /// Remove a memory. Unknown ids are not an error.
    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete(&[id.to_string()])?;
        debug!(id = %id, "Deleted memory");
        Ok(())
    }

    pub fn count(&self) -> Result<usize, ServiceError> {
        Ok(self.store.count()?)
    }

    /// Remove every memory, returning how many were removed.
    ///
    /// Not atomic with respect to concurrent `store` calls.
    pub fn clear(&self) -> Result<usize, ServiceError> {
        let ids = self.store.ids()?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete(&ids)?;
        info!(removed = ids.len(), "Cleared memories");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memory_embeddings::{EmbeddingCache, EmbeddingError, EmbeddingProvider};
    use memory_vector::FlatStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Letter-frequency embedding: texts sharing letters are close.
    struct LetterProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for LetterProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Cloud
        }

        fn name(&self) -> &str {
            "letters"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; 26];
            for b in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                v[(b - b'a') as usize] += 1.0;
            }
            Ok(v)
        }
    }

    struct Fixture {
        _temp: TempDir,
        provider: Arc<LetterProvider>,
        service: MemoryService,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(EmbeddingCache::open(temp.path().join("cache.json"), 1000).unwrap());
        let provider = Arc::new(LetterProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = Arc::new(CachedEmbedder::new(cache).with_provider(provider.clone()));
        let service = MemoryService::new(embedder, Arc::new(FlatStore::new()));
        Fixture {
            _temp: temp,
            provider,
            service,
        }
    }

    #[tokio::test]
    async fn test_store_derives_id_and_is_idempotent() {
        let f = fixture();
        let id = f
            .service
            .store(NewMemory::new("hello world"), ProviderKind::Cloud)
            .await
            .unwrap();
        assert_eq!(id, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(f.service.count().unwrap(), 1);

        let again = f
            .service
            .store(NewMemory::new("hello world"), ProviderKind::Cloud)
            .await
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(f.service.count().unwrap(), 1);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_explicit_id_and_metadata() {
        let f = fixture();
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("notes"));

        let id = f
            .service
            .store(
                NewMemory::new("meeting notes").with_id("m-1").with_metadata(metadata),
                ProviderKind::Cloud,
            )
            .await
            .unwrap();
        assert_eq!(id, "m-1");

        let results = f
            .service
            .search("meeting notes", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results[0].id, "m-1");
        assert_eq!(results[0].metadata["source"], json!("notes"));
    }

    #[tokio::test]
    async fn test_store_empty_content_uses_its_md5() {
        let f = fixture();
        let id = f
            .service
            .store(NewMemory::new(""), ProviderKind::Cloud)
            .await
            .unwrap();
        assert_eq!(id, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(f.service.count().unwrap(), 1);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_explicit_id() {
        let f = fixture();
        let err = f
            .service
            .store(NewMemory::new("hello").with_id(""), ProviderKind::Cloud)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_ranks_nearest_first() {
        let f = fixture();
        for text in ["hello world", "zzz qqq", "help me"] {
            f.service
                .store(NewMemory::new(text), ProviderKind::Cloud)
                .await
                .unwrap();
        }

        // "zzz qqq" shares no letters with the query: similarity 0
        let options = SearchOptions::default().with_threshold(0.1);
        let results = f.service.search("hello", &options).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].content, "hello world");
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(results.iter().all(|r| r.content != "zzz qqq"));
    }

    #[tokio::test]
    async fn test_threshold_extremes() {
        let f = fixture();
        for text in ["alpha", "beta", "gamma"] {
            f.service
                .store(NewMemory::new(text), ProviderKind::Cloud)
                .await
                .unwrap();
        }

        let everything = SearchOptions::default().with_threshold(-1.0).with_limit(10);
        assert_eq!(f.service.search("alpha", &everything).await.unwrap().len(), 3);

        let nothing = SearchOptions::default().with_threshold(1.01);
        assert!(f.service.search("alpha", &nothing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_skips_embedding() {
        let f = fixture();
        let options = SearchOptions::default().with_limit(0);
        assert!(f.service.search("anything", &options).await.unwrap().is_empty());
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_by_embedding_with_filter() {
        let f = fixture();
        let mut tagged = Metadata::new();
        tagged.insert("kind".to_string(), json!("task"));
        f.service
            .store(NewMemory::new("abc").with_metadata(tagged), ProviderKind::Cloud)
            .await
            .unwrap();
        f.service
            .store(NewMemory::new("abd"), ProviderKind::Cloud)
            .await
            .unwrap();

        let mut query = vec![0.0f32; 26];
        query[0] = 1.0;
        let options = SearchOptions::default()
            .with_threshold(-1.0)
            .with_filter(Some(MetadataFilter::eq("kind", "task")));
        let results = f.service.search_by_embedding(query, &options).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "abc");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let f = fixture();
        let id = f
            .service
            .store(NewMemory::new("one"), ProviderKind::Cloud)
            .await
            .unwrap();
        f.service
            .store(NewMemory::new("two"), ProviderKind::Cloud)
            .await
            .unwrap();

        f.service.delete("does-not-exist").unwrap();
        assert_eq!(f.service.count().unwrap(), 2);

        f.service.delete(&id).unwrap();
        assert_eq!(f.service.count().unwrap(), 1);

        assert_eq!(f.service.clear().unwrap(), 1);
        assert_eq!(f.service.count().unwrap(), 0);
        assert_eq!(f.service.clear().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_propagates() {
        let f = fixture();
        let err = f
            .service
            .store(NewMemory::new("text"), ProviderKind::Local)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Embedding(EmbeddingError::ProviderUnavailable(_))
        ));
    }
}
