//! Semantic memory service.
//!
//! Provides:
//! - `store`: embed content through the cache and upsert it
//! - `search` / `search_by_embedding`: nearest memories above a similarity
//!   threshold
//! - `delete`, `count` and `clear` maintenance operations

pub mod error;
pub mod service;
pub mod shaping;

pub use error::ServiceError;
pub use service::{MemoryService, NewMemory, SearchOptions};
pub use shaping::shape_results;
