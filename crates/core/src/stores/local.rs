use crate::traits::VectorIndex;
use crate::{IndexEntry, QueryHit, QueryResult, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

/// File-backed collection searched by exact cosine similarity.
///
/// The whole collection lives in `<dir>/<collection>.json` and is rewritten
/// through a temporary file after every upsert.
#[derive(Debug)]
pub struct LocalVectorStore {
    path: PathBuf,
    name: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl LocalVectorStore {
    pub async fn open(
        dir: impl AsRef<Path>,
        collection: &str,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        let dir = dir.as_ref();
        let path = dir.join(format!("{collection}.json"));
        let unavailable = |details: String| SearchError::IndexUnavailable {
            location: path.display().to_string(),
            details,
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|error| unavailable(error.to_string()))?;

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: CollectionFile = serde_json::from_slice(&bytes)
                    .map_err(|error| unavailable(format!("corrupt collection: {error}")))?;
                if stored.dimensions != dimensions {
                    return Err(unavailable(format!(
                        "collection has dimension {} but embedder produces {}",
                        stored.dimensions, dimensions
                    )));
                }
                stored.entries
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(unavailable(error.to_string())),
        };

        let positions = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.clone(), position))
            .collect();

        debug!(path = %path.display(), entries = entries.len(), "opened local collection");

        Ok(Self {
            path,
            name: collection.to_string(),
            dimensions,
            entries,
            positions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: Vec<IndexEntry>) -> Result<Vec<IndexEntry>, SearchError> {
        let file = CollectionFile {
            name: self.name.clone(),
            dimensions: self.dimensions,
            entries,
        };
        let bytes = serde_json::to_vec(&file)?;
        let staging = self.path.with_extension("json.tmp");

        let unavailable = |error: std::io::Error| SearchError::IndexUnavailable {
            location: self.path.display().to_string(),
            details: error.to_string(),
        };
        tokio::fs::write(&staging, bytes).await.map_err(unavailable)?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(unavailable)?;

        debug!(path = %self.path.display(), entries = file.entries.len(), "saved local collection");
        Ok(file.entries)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::Request(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn index_vector_chunks(&mut self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        for entry in entries {
            self.check_dimensions(&entry.embedding)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        // the handle only changes once the new collection is on disk
        let mut staged = self.entries.clone();
        let mut positions = self.positions.clone();
        for entry in entries {
            match positions.get(&entry.id) {
                Some(&position) => staged[position] = entry.clone(),
                None => {
                    positions.insert(entry.id.clone(), staged.len());
                    staged.push(entry.clone());
                }
            }
        }

        self.entries = self.persist(staged).await?;
        self.positions = positions;
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<QueryResult, SearchError> {
        self.check_dimensions(query_vector)?;

        let mut scored = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.embedding), entry))
            .collect::<Vec<_>>();

        // stable sort, so equal scores keep insertion order
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        debug!(candidates = scored.len(), top_k, "local vector search");

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| QueryHit {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }

    async fn entry_count(&self) -> Result<usize, SearchError> {
        Ok(self.entries.len())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let (mut dot, mut left_norm, mut right_norm) = (0f64, 0f64, 0f64);
    for (a, b) in left.iter().zip(right.iter()) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}
