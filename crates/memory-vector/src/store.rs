//! Vector store trait and query types.
//!
//! Responses are column-oriented: the outer index is the query vector, the
//! inner index is the rank of the hit (nearest first). Optional columns are
//! present only when requested through [`Include`].

use memory_types::{MemoryRecord, Metadata, MetadataFilter};

use crate::error::VectorError;

/// Columns to return alongside ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub documents: bool,
    pub metadatas: bool,
    pub distances: bool,
}

impl Default for Include {
    fn default() -> Self {
        Self::all()
    }
}

impl Include {
    pub fn all() -> Self {
        Self {
            documents: true,
            metadatas: true,
            distances: true,
        }
    }

    pub fn ids_only() -> Self {
        Self {
            documents: false,
            metadatas: false,
            distances: false,
        }
    }
}

/// Nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// One row of results is produced per query vector
    pub embeddings: Vec<Vec<f32>>,
    /// Maximum hits per row
    pub n_results: usize,
    /// Only records whose metadata matches are returned
    pub filter: Option<MetadataFilter>,
    pub include: Include,
}

impl QueryRequest {
    /// Single-vector query returning every column.
    pub fn new(embedding: Vec<f32>, n_results: usize) -> Self {
        Self {
            embeddings: vec![embedding],
            n_results,
            filter: None,
            include: Include::all(),
        }
    }

    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_include(mut self, include: Include) -> Self {
        self.include = include;
        self
    }
}

/// Query result, one row per query vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    pub documents: Option<Vec<Vec<String>>>,
    pub metadatas: Option<Vec<Vec<Metadata>>>,
    pub distances: Option<Vec<Vec<f32>>>,
}

/// A single ranked match, before column projection.
#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl QueryResponse {
    pub(crate) fn from_rows(include: Include, rows: Vec<Vec<Hit>>) -> Self {
        let mut response = QueryResponse {
            ids: Vec::with_capacity(rows.len()),
            documents: include.documents.then(Vec::new),
            metadatas: include.metadatas.then(Vec::new),
            distances: include.distances.then(Vec::new),
        };

        for row in rows {
            let mut ids = Vec::with_capacity(row.len());
            let mut documents = Vec::with_capacity(row.len());
            let mut metadatas = Vec::with_capacity(row.len());
            let mut distances = Vec::with_capacity(row.len());
            for hit in row {
                ids.push(hit.id);
                documents.push(hit.document);
                metadatas.push(hit.metadata);
                distances.push(hit.distance);
            }
            response.ids.push(ids);
            if let Some(col) = response.documents.as_mut() {
                col.push(documents);
            }
            if let Some(col) = response.metadatas.as_mut() {
                col.push(metadatas);
            }
            if let Some(col) = response.distances.as_mut() {
                col.push(distances);
            }
        }

        response
    }
}

/// Storage and nearest-neighbour search over memory records.
///
/// Implementations must be thread-safe; every method takes `&self`.
/// Distances are cosine distances.
pub trait VectorStore: Send + Sync {
    /// Insert records, replacing any existing record with the same id.
    fn upsert(&self, records: &[MemoryRecord]) -> Result<(), VectorError>;

    /// Nearest records for each query vector.
    fn query(&self, request: &QueryRequest) -> Result<QueryResponse, VectorError>;

    /// Remove records by id. Unknown ids are ignored.
    fn delete(&self, ids: &[String]) -> Result<(), VectorError>;

    /// Ids of every stored record.
    fn ids(&self) -> Result<Vec<String>, VectorError>;

    /// Number of stored records.
    fn count(&self) -> Result<usize, VectorError>;

    /// Embedding dimension, once the first record fixed it.
    fn dimension(&self) -> Option<usize>;
}

/// Reject records a store cannot index.
pub(crate) fn validate_records(records: &[MemoryRecord]) -> Result<(), VectorError> {
    for record in records {
        if record.id.is_empty() {
            return Err(VectorError::InvalidRequest("record id is empty".to_string()));
        }
        if record.embedding.is_empty() {
            return Err(VectorError::InvalidRequest(format!(
                "record {} has an empty embedding",
                record.id
            )));
        }
    }
    Ok(())
}

/// Keep the last occurrence of each id, preserving first-seen order.
pub(crate) fn dedup_last_wins(records: &[MemoryRecord]) -> Vec<&MemoryRecord> {
    let mut out: Vec<&MemoryRecord> = Vec::with_capacity(records.len());
    for record in records {
        match out.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => out.push(record),
        }
    }
    out
}
