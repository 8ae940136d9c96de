//! Stored memories and shaped search results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to a memory.
pub type Metadata = Map<String, Value>;

/// A memory as held by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Caller-supplied id, or the content hash
    pub id: String,
    /// Embedding of `document`
    pub embedding: Vec<f32>,
    /// The stored text
    pub document: String,
    /// Metadata (empty when none was supplied)
    #[serde(default)]
    pub metadata: Metadata,
}

impl MemoryRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, document: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            embedding,
            document: document.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach metadata (builder pattern).
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// One hit returned by a memory search.
///
/// `similarity` is always `1.0 - distance`, where `distance` is the cosine
/// distance reported by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub similarity: f32,
    pub distance: f32,
}

impl SearchResult {
    /// Build a result from a raw cosine distance.
    pub fn from_distance(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: Metadata,
        distance: f32,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            similarity: 1.0 - distance,
            distance,
        }
    }
}
