//! Embedding error types.

use thiserror::Error;

/// Errors that can occur while producing or caching embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Required configuration (e.g. an API key) is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The selected provider cannot run in this process
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Transport failure or timeout talking to a hosted API
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP response
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response did not contain a usable vector
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Candle model error
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model file not found
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Download error
    #[error("Failed to download model: {0}")]
    Download(String),

    /// Blocking task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache persistence error
    #[error("Cache error: {0}")]
    Cache(String),
}
