//! Turning a raw store response into search results.

use memory_types::{Metadata, SearchResult};
use memory_vector::QueryResponse;

/// Shape the first row of `response` into results.
///
/// Store order is kept (nearest first). A hit is kept iff
/// `1 - distance >= threshold`; missing distances count as `0.0`, missing
/// documents as `""` and missing metadata as `{}`.
pub fn shape_results(response: QueryResponse, threshold: f32) -> Vec<SearchResult> {
    let QueryResponse {
        ids,
        documents,
        metadatas,
        distances,
    } = response;

    let Some(ids) = ids.into_iter().next() else {
        return Vec::new();
    };
    let mut documents = first_row(documents).into_iter();
    let mut metadatas = first_row(metadatas).into_iter();
    let mut distances = first_row(distances).into_iter();

    ids.into_iter()
        .map(|id| {
            let content = documents.next().unwrap_or_default();
            let metadata = metadatas.next().unwrap_or_else(Metadata::new);
            let distance = distances.next().unwrap_or(0.0);
            SearchResult::from_distance(id, content, metadata, distance)
        })
        .filter(|result| result.similarity >= threshold)
        .collect()
}

fn first_row<T>(column: Option<Vec<Vec<T>>>) -> Vec<T> {
    column.and_then(|rows| rows.into_iter().next()).unwrap_or_default()
}
