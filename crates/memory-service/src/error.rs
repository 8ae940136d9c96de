//! Service error types.

use thiserror::Error;

use memory_embeddings::EmbeddingError;
use memory_vector::VectorError;

/// Errors returned by [`crate::MemoryService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Embedding provider or cache failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector store failure
    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),

    /// Caller passed unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
