//! Get-or-compute embedding front end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use memory_types::{HashKey, ProviderKind};

use crate::cache::EmbeddingCache;
use crate::error::EmbeddingError;
use crate::model::EmbeddingProvider;

/// Hit/miss counters of a [`CachedEmbedder`].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EmbedderStats {
    pub hits: u64,
    pub misses: u64,
}

/// Routes embedding requests to the chosen provider through the cache.
///
/// Cache keys are `"{provider}:{md5(text)}"`, so local and cloud vectors
/// for the same text never collide.
pub struct CachedEmbedder {
    cache: Arc<EmbeddingCache>,
    local: Option<Arc<dyn EmbeddingProvider>>,
    cloud: Option<Arc<dyn EmbeddingProvider>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(cache: Arc<EmbeddingCache>) -> Self {
        Self {
            cache,
            local: None,
            cloud: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Register a provider in the slot matching its `kind()`.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        match provider.kind() {
            ProviderKind::Local => self.local = Some(provider),
            ProviderKind::Cloud => self.cloud = Some(provider),
        }
        self
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn EmbeddingProvider>, EmbeddingError> {
        let slot = match kind {
            ProviderKind::Local => &self.local,
            ProviderKind::Cloud => &self.cloud,
        };
        slot.as_ref().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable(format!("no {kind} embedding provider configured"))
        })
    }

    /// Embed `text` with `kind`, consulting the cache first.
    ///
    /// Only successful provider results are cached.
    pub async fn embed(&self, text: &str, kind: ProviderKind) -> Result<Vec<f32>, EmbeddingError> {
        let key = HashKey::namespaced(kind.as_str(), text);

        if let Some(vector) = self.cache.get(key.as_str()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Embedding cache hit");
            return Ok(vector);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let provider = self.provider(kind)?;
        debug!(key = %key, provider = provider.name(), "Embedding cache miss");

        let vector = provider.embed(text).await?;
        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} returned an empty embedding",
                provider.name()
            )));
        }

        self.cache.set(key.into_string(), vector.clone());
        Ok(vector)
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
