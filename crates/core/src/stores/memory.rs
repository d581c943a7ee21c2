use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChunkHit, DocumentContent, DocumentMetadata, EmbeddingChunk, MetadataFilters, VersionEntry,
};
use crate::traits::{ContentStore, MetadataStore, VectorIndex};

/// In-process store backends. They uphold the same contracts as the remote
/// stores and back the coordinator test-suite and the CLI demo mode.
/// Clones share state, so a handle can be kept after one is handed to the
/// coordinator.
#[derive(Default, Clone)]
pub struct MemoryMetadataStore {
    records: Arc<RwLock<HashMap<Uuid, DocumentMetadata>>>,
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: &DocumentMetadata) -> Result<(), StoreError> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &DocumentMetadata) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(StoreError::NotFound(format!(
                "document metadata {}",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.records.write().await.remove(&document_id);
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<DocumentMetadata, StoreError> {
        self.records
            .read()
            .await
            .get(&document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document metadata {document_id}")))
    }

    async fn list_by_organization(
        &self,
        org_id: Uuid,
        filters: &MetadataFilters,
    ) -> Result<Vec<DocumentMetadata>, StoreError> {
        let records = self.records.read().await;
        let mut matches: Vec<DocumentMetadata> = records
            .values()
            .filter(|record| record.org_id == org_id)
            .filter(|record| filters.kind.map_or(true, |kind| record.kind == kind))
            .filter(|record| {
                filters.title_contains.as_deref().map_or(true, |needle| {
                    record.title.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .filter(|record| !filters.stale_only || record.search_stale)
            .cloned()
            .collect();
        matches.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(matches)
    }
}

#[derive(Default, Clone)]
pub struct MemoryContentStore {
    records: Arc<RwLock<HashMap<Uuid, DocumentContent>>>,
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn upsert(
        &self,
        document_id: Uuid,
        content: &str,
        extra: &Map<String, Value>,
        author: Uuid,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        match records.get_mut(&document_id) {
            Some(record) => {
                let snapshot = VersionEntry {
                    content: std::mem::take(&mut record.content),
                    extra: std::mem::take(&mut record.extra),
                    author: record.updated_by,
                    recorded_at: now,
                };
                record.versions.push(snapshot);
                record.content = content.to_string();
                record.extra = extra.clone();
                record.updated_by = author;
                record.updated_at = now;
            }
            None => {
                records.insert(
                    document_id,
                    DocumentContent {
                        document_id,
                        content: content.to_string(),
                        extra: extra.clone(),
                        updated_by: author,
                        updated_at: now,
                        versions: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<DocumentContent, StoreError> {
        self.records
            .read()
            .await
            .get(&document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document content {document_id}")))
    }

    async fn version_history(&self, document_id: Uuid) -> Result<Vec<VersionEntry>, StoreError> {
        Ok(self.get(document_id).await?.versions)
    }

    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.records.write().await.remove(&document_id);
        Ok(())
    }
}

#[derive(Default)]
struct VectorState {
    chunks: HashMap<Uuid, Vec<StoredChunk>>,
    insert_seq: u64,
}

struct StoredChunk {
    chunk: EmbeddingChunk,
    seq: u64,
}

#[derive(Default, Clone)]
pub struct MemoryVectorIndex {
    state: Arc<RwLock<VectorState>>,
}

impl MemoryVectorIndex {
    /// Total chunks currently stored for a document, across all callers.
    pub async fn chunk_count(&self, document_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .chunks
            .get(&document_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn replace_chunks(
        &self,
        document_id: Uuid,
        chunks: &[EmbeddingChunk],
    ) -> Result<(), StoreError> {
        // One write section swaps the whole generation; readers never see a
        // mix of old and new chunks.
        let mut state = self.state.write().await;
        state.chunks.remove(&document_id);
        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            state.insert_seq += 1;
            let seq = state.insert_seq;
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                seq,
            });
        }
        if !stored.is_empty() {
            state.chunks.insert(document_id, stored);
        }
        Ok(())
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<(), StoreError> {
        self.state.write().await.chunks.remove(&document_id);
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        org_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let state = self.state.read().await;
        let mut scored: Vec<(f64, u64, ChunkHit)> = state
            .chunks
            .values()
            .flatten()
            .filter(|stored| stored.chunk.org_id == org_id)
            .map(|stored| {
                let score = cosine_similarity(query_vector, &stored.chunk.embedding);
                (
                    score,
                    stored.seq,
                    ChunkHit {
                        chunk_id: stored.chunk.id,
                        document_id: stored.chunk.document_id,
                        chunk_text: stored.chunk.text.clone(),
                        score,
                    },
                )
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.cmp(&right.1))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, _, hit)| hit)
            .collect())
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    fn chunk(document_id: Uuid, org_id: Uuid, index: u32, embedding: Vec<f32>) -> EmbeddingChunk {
        let text = format!("chunk {index}");
        EmbeddingChunk {
            id: EmbeddingChunk::deterministic_id(document_id, index, &text),
            document_id,
            org_id,
            index,
            text,
            embedding,
        }
    }

    fn metadata(org_id: Uuid, title: &str, kind: DocumentKind) -> DocumentMetadata {
        let now = Utc::now();
        DocumentMetadata {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind,
            description: None,
            tags: Vec::new(),
            owner_id: Uuid::new_v4(),
            org_id,
            search_stale: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn get_missing_metadata_is_not_found() {
        let store = MemoryMetadataStore::default();
        let result = store.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn listing_filters_by_kind_and_staleness() {
        let store = MemoryMetadataStore::default();
        let org = Uuid::new_v4();
        let mut sop = metadata(org, "Evacuation SOP", DocumentKind::Sop);
        sop.search_stale = true;
        store.insert(&sop).await.unwrap();
        store
            .insert(&metadata(org, "Vendor list", DocumentKind::VendorContract))
            .await
            .unwrap();
        store
            .insert(&metadata(Uuid::new_v4(), "Other org SOP", DocumentKind::Sop))
            .await
            .unwrap();

        let sops = store
            .list_by_organization(
                org,
                &MetadataFilters {
                    kind: Some(DocumentKind::Sop),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(sops.len(), 1);
        assert_eq!(sops[0].title, "Evacuation SOP");

        let stale = store
            .list_by_organization(
                org,
                &MetadataFilters {
                    stale_only: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn upsert_appends_previous_content_to_history() {
        let store = MemoryContentStore::default();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        store.upsert(doc, "v1", &Map::new(), author).await.unwrap();
        assert!(store.version_history(doc).await.unwrap().is_empty());

        store.upsert(doc, "v2", &Map::new(), author).await.unwrap();
        let history = store.version_history(doc).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "v1");
        assert_eq!(store.get(doc).await.unwrap().content, "v2");
    }

    #[tokio::test]
    async fn replace_chunks_swaps_the_whole_generation() {
        let index = MemoryVectorIndex::default();
        let doc = Uuid::new_v4();
        let org = Uuid::new_v4();

        index
            .replace_chunks(
                doc,
                &[
                    chunk(doc, org, 0, vec![1.0, 0.0]),
                    chunk(doc, org, 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(index.chunk_count(doc).await, 2);

        index
            .replace_chunks(doc, &[chunk(doc, org, 0, vec![0.5, 0.5])])
            .await
            .unwrap();
        assert_eq!(index.chunk_count(doc).await, 1);

        let hits = index.search(&[1.0, 0.0], org, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_text, "chunk 0");
    }

    #[tokio::test]
    async fn search_is_scoped_to_the_organization() {
        let index = MemoryVectorIndex::default();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        index
            .replace_chunks(doc_a, &[chunk(doc_a, org_a, 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .replace_chunks(doc_b, &[chunk(doc_b, org_b, 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], org_a, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, doc_a);
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let index = MemoryVectorIndex::default();
        let org = Uuid::new_v4();
        let doc = Uuid::new_v4();

        index
            .replace_chunks(
                doc,
                &[
                    chunk(doc, org, 0, vec![1.0, 0.0]),
                    chunk(doc, org, 1, vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], org, 2).await.unwrap();
        assert_eq!(hits[0].chunk_text, "chunk 0");
        assert_eq!(hits[1].chunk_text, "chunk 1");
    }
}
