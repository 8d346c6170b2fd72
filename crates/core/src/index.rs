use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{Chunk, IndexEntry, LineRef, Locator, QueryResult, SearchError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Embeds chunks and keeps them in a [`VectorIndex`] for nearest-neighbor lookup.
pub struct RetrievalIndex<V, E> {
    store: V,
    embedder: E,
}

impl<V, E> RetrievalIndex<V, E>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    pub fn new(store: V, embedder: E) -> Result<Self, SearchError> {
        if store.dimensions() != embedder.dimensions() {
            return Err(SearchError::Request(format!(
                "store dimension {} does not match embedder dimension {}",
                store.dimensions(),
                embedder.dimensions()
            )));
        }
        Ok(Self { store, embedder })
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    /// Embeds all chunks in one batch and upserts them. Returns the number of entries written.
    ///
    /// Entry ids are derived from the chunk's locator, its position among chunks
    /// of the same line, and its content, so re-adding the same file replaces
    /// the earlier entries instead of duplicating them.
    pub async fn add(&mut self, chunks: &[Chunk]) -> Result<usize, SearchError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts)?;
        if embeddings.len() != chunks.len() {
            return Err(SearchError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let indexed_at = Utc::now();
        let mut ordinals: HashMap<&Locator, u32> = HashMap::new();
        let entries = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let ordinal = ordinals.entry(&chunk.locator).or_insert(0);
                let id = make_entry_id(&chunk.locator, *ordinal, &chunk.text);
                *ordinal += 1;
                IndexEntry {
                    id,
                    chunk: chunk.clone(),
                    embedding,
                    indexed_at,
                }
            })
            .collect::<Vec<_>>();

        self.store.index_vector_chunks(&entries).await?;
        debug!(entries = entries.len(), "indexed chunks");
        Ok(entries.len())
    }

    pub async fn query(&self, text: &str, k: usize) -> Result<QueryResult, SearchError> {
        if k == 0 {
            return Err(SearchError::Request("k must be at least 1".to_string()));
        }

        let query_vector = self.embedder.embed(text)?;
        let mut hits = self.store.search_vector(&query_vector, k).await?;
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn len(&self) -> Result<usize, SearchError> {
        self.store.entry_count().await
    }

    pub async fn is_empty(&self) -> Result<bool, SearchError> {
        Ok(self.len().await? == 0)
    }
}

fn make_entry_id(locator: &Locator, ordinal: u32, text: &str) -> String {
    let content_hash = Sha256::digest(text.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(locator.file.as_bytes());
    hasher.update([0u8]);
    hasher.update(locator.page.to_le_bytes());
    match locator.line {
        LineRef::Text(line) => {
            hasher.update(b"text");
            hasher.update(line.to_le_bytes());
        }
        LineRef::Image(image) => {
            hasher.update(b"image");
            hasher.update(image.0.to_le_bytes());
        }
    }
    hasher.update(ordinal.to_le_bytes());
    hasher.update(content_hash);
    format!("{:x}", hasher.finalize())
}
