//! Error types for the memory store.

use thiserror::Error;

/// Unified error type for shared memory types.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed metadata filter
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}
