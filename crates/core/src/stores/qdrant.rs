use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChunkHit, EmbeddingChunk};
use crate::traits::VectorIndex;

/// Chunk embeddings live in a single Qdrant collection configured for
/// cosine distance, one point per chunk, tagged with the owning document
/// and organization.
pub struct QdrantVectorIndex {
    client: Client,
    endpoint: String,
    collection: String,
    vector_size: usize,
}

impl QdrantVectorIndex {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            collection: collection.into(),
            vector_size,
        }
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine"
                }
            }))
            .send()
            .await?;

        // 409 means the collection already exists.
        if !response.status().is_success() && response.status().as_u16() != 409 {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "filter": {
                    "must": [
                        {"key": "document_id", "match": {"value": document_id.to_string()}}
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn replace_chunks(
        &self,
        document_id: Uuid,
        chunks: &[EmbeddingChunk],
    ) -> Result<(), StoreError> {
        let points = chunks
            .iter()
            .map(|chunk| {
                if chunk.embedding.len() != self.vector_size {
                    return Err(StoreError::BackendResponse {
                        backend: "qdrant".to_string(),
                        details: format!(
                            "embedding dimension {} does not match collection size {}",
                            chunk.embedding.len(),
                            self.vector_size
                        ),
                    });
                }

                Ok(json!({
                    "id": chunk.id.to_string(),
                    "vector": chunk.embedding,
                    "payload": {
                        "document_id": chunk.document_id.to_string(),
                        "org_id": chunk.org_id.to_string(),
                        "chunk_index": chunk.index,
                        "text": chunk.text,
                    }
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.delete_by_document(document_id).await?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.delete_by_document(document_id).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        org_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!(
                    "query vector dimension {} does not match collection size {}",
                    query_vector.len(),
                    self.vector_size
                ),
            });
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
                "filter": {
                    "must": [
                        {"key": "org_id", "match": {"value": org_id.to_string()}}
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let raw_hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for raw in raw_hits {
            let chunk_id = raw
                .pointer("/id")
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok());
            let document_id = raw
                .pointer("/payload/document_id")
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok());
            let (Some(chunk_id), Some(document_id)) = (chunk_id, document_id) else {
                continue;
            };

            hits.push(ChunkHit {
                chunk_id,
                document_id,
                chunk_text: raw
                    .pointer("/payload/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: raw.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
            });
        }

        Ok(hits)
    }
}
