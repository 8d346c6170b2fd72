use crate::traits::VectorIndex;
use crate::{Chunk, IndexEntry, LineRef, Locator, QueryHit, QueryResult, SearchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, SearchError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{base}/collections/{}{suffix}",
            self.collection
        ))?)
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let url = self.collection_url("")?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| self.unavailable(error.to_string()))?;

        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let size = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match size {
                Some(size) if size as usize != self.vector_size => Err(self.unavailable(format!(
                    "collection vector size {size} does not match embedder size {}",
                    self.vector_size
                ))),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(self.unavailable(response.status().to_string()));
        }

        let response = self
            .client
            .put(url)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| self.unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(self.unavailable(response.status().to_string()));
        }
        Ok(())
    }

    fn unavailable(&self, details: String) -> SearchError {
        SearchError::IndexUnavailable {
            location: format!("{}collections/{}", self.endpoint, self.collection),
            details,
        }
    }
}

/// Qdrant only accepts integer or UUID point ids, so the hex entry id is folded into a UUID.
fn point_id(entry_id: &str) -> Result<Uuid, SearchError> {
    let prefix = entry_id.get(..32).unwrap_or(entry_id);
    Uuid::parse_str(prefix)
        .map_err(|error| SearchError::Request(format!("entry id {entry_id} is not hex: {error}")))
}

fn point_payload(entry: &IndexEntry) -> Result<Value, SearchError> {
    Ok(json!({
        "id": point_id(&entry.id)?.to_string(),
        "vector": entry.embedding,
        "payload": {
            "entry_id": entry.id,
            "text": entry.chunk.text,
            "file": entry.chunk.locator.file,
            "page": entry.chunk.locator.page,
            "line": entry.chunk.locator.line,
            "indexed_at": entry.indexed_at.to_rfc3339(),
        },
    }))
}

fn hit_from_point(hit: &Value) -> Result<QueryHit, SearchError> {
    let malformed = |field: &str| SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("search hit is missing {field}"),
    };

    let text = hit
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("text"))?;
    let file = hit
        .pointer("/payload/file")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("file"))?;
    let page = hit
        .pointer("/payload/page")
        .and_then(Value::as_u64)
        .and_then(|page| u32::try_from(page).ok())
        .ok_or_else(|| malformed("page"))?;
    let line = hit
        .pointer("/payload/line")
        .cloned()
        .ok_or_else(|| malformed("line"))?;
    let line: LineRef = serde_json::from_value(line)?;
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    Ok(QueryHit {
        chunk: Chunk {
            text: text.to_string(),
            locator: Locator {
                file: file.to_string(),
                page,
                line,
            },
        },
        score,
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn index_vector_chunks(&mut self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        let points = entries
            .iter()
            .map(|entry| {
                if entry.embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        entry.embedding.len(),
                        self.vector_size
                    )));
                }
                point_payload(entry)
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| self.unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<QueryResult, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.collection_url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| self.unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().take(top_k).map(hit_from_point).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn entry_count(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .post(self.collection_url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(|error| self.unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}
