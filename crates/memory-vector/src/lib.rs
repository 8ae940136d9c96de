//! # memory-vector
//!
//! Vector stores for semantic memory.
//!
//! Records are `(id, embedding, document, metadata)` tuples; queries return
//! the nearest records by cosine distance (`1 - cos`, in `[0, 2]`).
//!
//! ## Backends
//! - [`HnswStore`]: usearch HNSW index persisted next to a RocksDB record
//!   database. Approximate, persistent.
//! - [`FlatStore`]: exact linear scan over an in-memory map. Nothing is
//!   written to disk.

pub mod error;
pub mod flat;
pub mod hnsw;
pub mod records;
pub mod store;

pub use error::VectorError;
pub use flat::FlatStore;
pub use hnsw::{HnswConfig, HnswStore};
pub use records::{RecordDb, RecordEntry, CF_RECORDS, CF_VECTOR_KEYS};
pub use store::{Include, QueryRequest, QueryResponse, VectorStore};
