//! Exact in-memory store.
//!
//! Scans every record per query. Suited to tests and short-lived sessions;
//! nothing is persisted.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use memory_embeddings::cosine_similarity;
use memory_types::MemoryRecord;

use crate::error::VectorError;
use crate::store::{dedup_last_wins, validate_records, Hit, QueryRequest, QueryResponse, VectorStore};

/// Linear-scan store. Ties in distance are broken by id.
#[derive(Default)]
pub struct FlatStore {
    records: RwLock<BTreeMap<String, MemoryRecord>>,
}

impl FlatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for FlatStore {
    fn upsert(&self, records: &[MemoryRecord]) -> Result<(), VectorError> {
        validate_records(records)?;
        let records = dedup_last_wins(records);

        let mut stored = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let expected = stored
            .values()
            .next()
            .or(records.first().copied())
            .map(MemoryRecord::dimension);

        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.dimension() != expected) {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    actual: bad.dimension(),
                });
            }
        }

        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        debug!(count = stored.len(), "Upserted into flat store");
        Ok(())
    }

    fn query(&self, request: &QueryRequest) -> Result<QueryResponse, VectorError> {
        let stored = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let dimension = stored.values().next().map(MemoryRecord::dimension);

        let mut rows = Vec::with_capacity(request.embeddings.len());
        for query in &request.embeddings {
            if let Some(expected) = dimension {
                if query.len() != expected {
                    return Err(VectorError::DimensionMismatch {
                        expected,
                        actual: query.len(),
                    });
                }
            }

            let mut hits: Vec<Hit> = stored
                .values()
                .filter(|r| {
                    request
                        .filter
                        .as_ref()
                        .map_or(true, |f| f.matches(&r.metadata))
                })
                .map(|r| Hit {
                    id: r.id.clone(),
                    document: r.document.clone(),
                    metadata: r.metadata.clone(),
                    distance: 1.0 - cosine_similarity(query, &r.embedding),
                })
                .collect();

            // BTreeMap iteration is already id-ordered and the sort is stable
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(request.n_results);
            rows.push(hits);
        }

        Ok(QueryResponse::from_rows(request.include, rows))
    }

    fn delete(&self, ids: &[String]) -> Result<(), VectorError> {
        let mut stored = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, VectorError> {
        let stored = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.keys().cloned().collect())
    }

    fn count(&self) -> Result<usize, VectorError> {
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn dimension(&self) -> Option<usize> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .next()
            .map(MemoryRecord::dimension)
    }
}
