use crate::error::SearchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub trait Embedder {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Hashed character-trigram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return Ok(vector);
        }

        // word edges count as trigrams so short queries still land somewhere
        let chars: Vec<char> = format!(" {lowered} ").chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama-compatible `/api/embed` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        let endpoint = Url::parse(base_url)?.join("api/embed")?;
        Ok(Self {
            endpoint,
            model: model.into(),
            dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let response = Client::new()
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|error| SearchError::Embedding(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Embedding(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .map_err(|error| SearchError::Embedding(error.to_string()))?;
        check_embeddings(payload.embeddings, texts.len(), self.dimensions)
    }
}

impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::Embedding("empty embedding response".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::task::block_in_place(|| self.request_blocking(texts))
    }
}

fn check_embeddings(
    embeddings: Vec<Vec<f32>>,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, SearchError> {
    if embeddings.len() != expected_count {
        return Err(SearchError::Embedding(format!(
            "expected {expected_count} embeddings, got {}",
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimensions) {
        return Err(SearchError::Embedding(format!(
            "embedding dimension {} != {dimensions}",
            bad.len()
        )));
    }
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::{check_embeddings, CharacterNgramEmbedder, Embedder, OllamaEmbedder};

    #[test]
    fn embedder_is_deterministic() -> Result<(), crate::SearchError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow")?;
        let second = embedder.embed("Hydraulic pressure and flow")?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn embedder_outputs_expected_length() -> Result<(), crate::SearchError> {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc")?;
        assert_eq!(vector.len(), 32);
        Ok(())
    }

    #[test]
    fn short_text_still_has_signal() -> Result<(), crate::SearchError> {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed("Hi")?;
        assert!(vector.iter().any(|value| *value > 0.0));
        Ok(())
    }

    #[test]
    fn batch_matches_single_embeddings() -> Result<(), crate::SearchError> {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts)?;
        assert_eq!(batch, vec![embedder.embed("alpha")?, embedder.embed("beta")?]);
        Ok(())
    }

    #[test]
    fn ollama_endpoint_is_joined_onto_base_url() -> Result<(), crate::SearchError> {
        let embedder = OllamaEmbedder::new("http://localhost:11434/", "all-minilm", 384)?;
        assert_eq!(embedder.endpoint.as_str(), "http://localhost:11434/api/embed");
        assert_eq!(embedder.model(), "all-minilm");
        assert!(OllamaEmbedder::new("not a url", "m", 3).is_err());
        Ok(())
    }

    #[test]
    fn mismatched_embedding_responses_are_rejected() {
        assert!(check_embeddings(vec![vec![0.0; 3]], 2, 3).is_err());
        assert!(check_embeddings(vec![vec![0.0; 4]], 1, 3).is_err());
        assert!(check_embeddings(vec![vec![0.0; 3]], 1, 3).is_ok());
    }
}
