use crate::{IndexEntry, QueryResult, SearchError};
use async_trait::async_trait;

/// Persistent nearest-neighbor storage for embedded chunks.
#[async_trait]
pub trait VectorIndex {
    fn dimensions(&self) -> usize;

    /// Inserts the entries, replacing any stored entry with the same id.
    async fn index_vector_chunks(&mut self, entries: &[IndexEntry]) -> Result<(), SearchError>;

    /// Returns at most `top_k` entries ordered by descending similarity.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<QueryResult, SearchError>;

    async fn entry_count(&self) -> Result<usize, SearchError>;
}
