//! # memory-types
//!
//! Shared domain types for the semantic memory store.
//!
//! This crate defines the data structures passed between the embedding
//! cache, the vector store and the memory service:
//! - HashKey: deterministic content fingerprints
//! - ProviderKind: local vs cloud embedding choice
//! - Records: stored memories and shaped search results
//! - Filters: metadata `where` clauses
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use memory_types::HashKey;
//!
//! let key = HashKey::of("hello world");
//! assert_eq!(key.as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod hash;
pub mod provider;
pub mod record;

pub use config::{
    CacheSettings, CloudEmbeddingSettings, EmbeddingSettings, LocalEmbeddingSettings,
    SearchSettings, Settings, VectorBackend, VectorSettings,
};
pub use error::MemoryError;
pub use filter::MetadataFilter;
pub use hash::HashKey;
pub use provider::ProviderKind;
pub use record::{MemoryRecord, Metadata, SearchResult};
