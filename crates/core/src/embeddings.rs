use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::CoreError;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Produces fixed-dimension vectors for text. `embed_batch` preserves input
/// order; failures surface as `CoreError::EmbeddingUnavailable` and are
/// retried by the coordinator, not here.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for Box<dyn Embedder> {
    fn dimensions(&self) -> usize {
        self.as_ref().dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.as_ref().embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        self.as_ref().embed_batch(texts).await
    }
}

/// Deterministic local embedder: character trigrams hashed into buckets,
/// L2-normalized. Good enough for offline use and tests; real deployments
/// point `HttpEmbedder` at a model server.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

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

        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        Ok(self.embed_sync(text))
    }
}

/// Adapter for a JSON embedding service:
/// `POST {endpoint}/embed {"inputs": [...]}` returning
/// `{"embeddings": [[f32; D], ...]}` in input order.
pub struct HttpEmbedder {
    endpoint: String,
    client: Client,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Result<Self, CoreError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        url::Url::parse(&endpoint).map_err(|error| {
            CoreError::InvalidArgument(format!("embedder endpoint {endpoint}: {error}"))
        })?;
        Ok(Self {
            endpoint,
            client: Client::new(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let inputs = [text.to_string()];
        let vectors = self.embed_batch(&inputs).await?;
        vectors.into_iter().next().ok_or_else(|| {
            CoreError::EmbeddingUnavailable("embedding service returned no vectors".to_string())
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embed", self.endpoint))
            .json(&json!({ "inputs": texts }))
            .send()
            .await
            .map_err(|error| CoreError::EmbeddingUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::EmbeddingUnavailable(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| CoreError::EmbeddingUnavailable(error.to_string()))?;

        let rows = parsed
            .pointer("/embeddings")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CoreError::EmbeddingUnavailable(
                    "embedding response missing embeddings field".to_string(),
                )
            })?;

        if rows.len() != texts.len() {
            return Err(CoreError::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                texts.len(),
                rows.len()
            )));
        }

        rows.iter()
            .map(|row| {
                let vector: Vec<f32> = row
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_f64)
                            .map(|value| value as f32)
                            .collect()
                    })
                    .unwrap_or_default();

                if vector.len() != self.dimensions {
                    return Err(CoreError::EmbeddingUnavailable(format!(
                        "embedding dimension {} does not match configured {}",
                        vector.len(),
                        self.dimensions
                    )));
                }
                Ok(vector)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashingEmbedder, HttpEmbedder};

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed("failover to the secondary site").await.unwrap();
        let second = embedder.embed("failover to the secondary site").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hashing_embedder_outputs_expected_length() {
        let embedder = HashingEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["first chunk".to_string(), "second chunk".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed("first chunk").await.unwrap());
        assert_eq!(batch[1], embedder.embed("second chunk").await.unwrap());
    }

    #[test]
    fn http_embedder_rejects_bad_endpoints() {
        assert!(HttpEmbedder::new("not a url", 128).is_err());
        assert!(HttpEmbedder::new("http://localhost:8080/", 128).is_ok());
    }
}
