use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChunkHit, DocumentContent, DocumentMetadata, EmbeddingChunk, MetadataFilters, VersionEntry,
};

/// Source of truth for document existence and organization scoping. Every
/// read issued on behalf of a caller is filtered by that caller's
/// organization.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: &DocumentMetadata) -> Result<(), StoreError>;

    async fn update(&self, record: &DocumentMetadata) -> Result<(), StoreError>;

    /// Deleting an absent record succeeds; compensating deletes must be
    /// re-runnable.
    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError>;

    /// `StoreError::NotFound` for absent ids, never a placeholder record.
    async fn get(&self, document_id: Uuid) -> Result<DocumentMetadata, StoreError>;

    async fn list_by_organization(
        &self,
        org_id: Uuid,
        filters: &MetadataFilters,
    ) -> Result<Vec<DocumentMetadata>, StoreError>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// First write creates the record with an empty version history; later
    /// writes append the previous current state to the history before
    /// overwriting. Callers serialize per document.
    async fn upsert(
        &self,
        document_id: Uuid,
        content: &str,
        extra: &Map<String, Value>,
        author: Uuid,
    ) -> Result<(), StoreError>;

    async fn get(&self, document_id: Uuid) -> Result<DocumentContent, StoreError>;

    /// Oldest first.
    async fn version_history(&self, document_id: Uuid) -> Result<Vec<VersionEntry>, StoreError>;

    /// Removes the record and its whole history; absent records succeed.
    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError>;
}

/// Similarity is cosine everywhere; scores are higher-is-closer.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Swaps in a whole new chunk generation for the document: every chunk
    /// of the prior generation is gone once this returns.
    async fn replace_chunks(
        &self,
        document_id: Uuid,
        chunks: &[EmbeddingChunk],
    ) -> Result<(), StoreError>;

    /// Absent documents succeed.
    async fn delete_chunks(&self, document_id: Uuid) -> Result<(), StoreError>;

    /// Nearest chunks among those tagged with `org_id`, ties broken by
    /// insertion order.
    async fn search(
        &self,
        query_vector: &[f32],
        org_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, StoreError>;
}
