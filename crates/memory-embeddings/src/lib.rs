//! # memory-embeddings
//!
//! Embedding generation for the memory store, with a persistent cache in
//! front of the providers.
//!
//! ## Features
//! - Local inference via Candle (all-MiniLM-L6-v2, 384 dimensions)
//! - Gemini `embedContent` API client
//! - JSON-backed embedding cache with LRU bound, non-blocking writes and
//!   atomic file replacement
//! - `CachedEmbedder`: get-or-compute keyed by provider and content hash

pub mod cache;
pub mod cached;
pub mod candle;
pub mod error;
pub mod gemini;
pub mod local;
pub mod model;
pub mod model_files;

pub use crate::candle::CandleEmbedder;
pub use cache::{CacheLoadStatus, CacheStats, EmbeddingCache};
pub use cached::{CachedEmbedder, EmbedderStats};
pub use error::EmbeddingError;
pub use gemini::{ApiKeySource, GeminiConfig, GeminiEmbedder};
pub use local::LocalEmbedder;
pub use memory_types::ProviderKind;
pub use model::{cosine_similarity, normalize, EmbeddingProvider, ModelInfo};
pub use model_files::{get_or_download_model, ModelFiles, ModelPaths, DEFAULT_MODEL_REPO, MODEL_FILES};
