use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{CoreError, StoreError};
use crate::models::{
    validate_extra, Claims, ContentUpdate, DocumentContent, DocumentDraft, DocumentMetadata,
    EmbeddingChunk, MetadataFilters, MetadataPatch, SearchHit, VersionEntry,
};
use crate::traits::{ContentStore, MetadataStore, VectorIndex};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub chunking: ChunkingConfig,
    /// Total embedding attempts per write, counting the first.
    pub embed_attempts: u32,
    pub embed_backoff_base: Duration,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
    /// Search over-fetches this many times `top_k` from the vector index so
    /// tombstoned hits can be dropped without starving the result list.
    pub search_overfetch: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embed_attempts: 3,
            embed_backoff_base: Duration::from_millis(200),
            embed_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
            search_overfetch: 2,
        }
    }
}

/// Sequences every document write across the metadata, content, and vector
/// stores as a saga: ordered steps with compensating deletes instead of a
/// cross-store transaction.
pub struct DocumentCoordinator<M, C, V, E> {
    inner: Arc<Inner<M, C, V, E>>,
}

impl<M, C, V, E> Clone for DocumentCoordinator<M, C, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<M, C, V, E> {
    metadata: M,
    content: C,
    vectors: V,
    embedder: E,
    config: CoordinatorConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<M, C, V, E> DocumentCoordinator<M, C, V, E>
where
    M: MetadataStore + 'static,
    C: ContentStore + 'static,
    V: VectorIndex + 'static,
    E: Embedder + 'static,
{
    pub fn new(metadata: M, content: C, vectors: V, embedder: E) -> Self {
        Self::with_config(metadata, content, vectors, embedder, CoordinatorConfig::default())
    }

    pub fn with_config(
        metadata: M,
        content: C,
        vectors: V,
        embedder: E,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                metadata,
                content,
                vectors,
                embedder,
                config,
                locks: DashMap::new(),
            }),
        }
    }

    pub async fn create_document(
        &self,
        claims: Claims,
        draft: DocumentDraft,
    ) -> Result<DocumentMetadata, CoreError> {
        draft.validate()?;
        let inner = Arc::clone(&self.inner);
        run_to_completion(async move { inner.create(claims, draft).await }).await
    }

    pub async fn update_document(
        &self,
        claims: Claims,
        document_id: Uuid,
        patch: MetadataPatch,
        content: Option<ContentUpdate>,
    ) -> Result<DocumentMetadata, CoreError> {
        let inner = Arc::clone(&self.inner);
        run_to_completion(async move { inner.update(claims, document_id, patch, content).await })
            .await
    }

    pub async fn delete_document(&self, claims: Claims, document_id: Uuid) -> Result<(), CoreError> {
        let inner = Arc::clone(&self.inner);
        run_to_completion(async move { inner.delete(claims, document_id).await }).await
    }

    /// Re-runs chunking and embedding for a document whose vector index fell
    /// behind its content, clearing the stale flag on success.
    pub async fn reindex_document(
        &self,
        claims: Claims,
        document_id: Uuid,
    ) -> Result<DocumentMetadata, CoreError> {
        let inner = Arc::clone(&self.inner);
        run_to_completion(async move { inner.reindex(claims, document_id).await }).await
    }

    pub async fn get_document(
        &self,
        claims: Claims,
        document_id: Uuid,
    ) -> Result<(DocumentMetadata, DocumentContent), CoreError> {
        self.inner.get(claims, document_id).await
    }

    pub async fn get_version_history(
        &self,
        claims: Claims,
        document_id: Uuid,
    ) -> Result<Vec<VersionEntry>, CoreError> {
        self.inner.version_history(claims, document_id).await
    }

    pub async fn list_documents(
        &self,
        claims: Claims,
        filters: &MetadataFilters,
    ) -> Result<Vec<DocumentMetadata>, CoreError> {
        self.inner
            .store_call(self.inner.metadata.list_by_organization(claims.org_id, filters))
            .await
    }

    pub async fn search_documents(
        &self,
        claims: Claims,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, CoreError> {
        self.inner.search(claims, query, top_k).await
    }
}

/// Sagas must finish their compensation even if the caller goes away, so
/// write paths run on a detached task that the caller merely awaits.
async fn run_to_completion<T>(
    future: impl Future<Output = Result<T, CoreError>> + Send + 'static,
) -> Result<T, CoreError>
where
    T: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(result) => result,
        Err(join_error) => Err(CoreError::Inconsistent(format!(
            "write task aborted mid-saga: {join_error}"
        ))),
    }
}

impl<M, C, V, E> Inner<M, C, V, E>
where
    M: MetadataStore,
    C: ContentStore,
    V: VectorIndex,
    E: Embedder,
{
    async fn create(
        &self,
        claims: Claims,
        draft: DocumentDraft,
    ) -> Result<DocumentMetadata, CoreError> {
        let now = Utc::now();
        let record = DocumentMetadata {
            id: Uuid::new_v4(),
            title: draft.title.clone(),
            kind: draft.kind,
            description: draft.description.clone(),
            tags: draft.tags.clone(),
            owner_id: claims.user_id,
            org_id: claims.org_id,
            search_stale: false,
            created_at: now,
            updated_at: now,
        };

        self.store_call(self.metadata.insert(&record)).await?;

        if let Err(cause) = self
            .store_call(self.content.upsert(
                record.id,
                &draft.content,
                &draft.extra,
                claims.user_id,
            ))
            .await
        {
            return Err(self.abort_create(record.id, false, cause).await);
        }

        if let Err(cause) = self.index_chunks(&record, &draft.content).await {
            return Err(self.abort_create(record.id, true, cause).await);
        }

        info!(document_id = %record.id, org_id = %record.org_id, "document created");
        Ok(record)
    }

    /// Compensating deletes run in reverse write order; each is idempotent.
    /// A failed compensation escalates to `Inconsistent` and is logged for
    /// manual reconciliation rather than retried forever.
    async fn abort_create(
        &self,
        document_id: Uuid,
        content_written: bool,
        cause: CoreError,
    ) -> CoreError {
        warn!(document_id = %document_id, cause = %cause, "create failed, removing partial writes");

        let rollback: Result<(), CoreError> = async {
            if content_written {
                self.store_call(self.vectors.delete_chunks(document_id)).await?;
                self.store_call(self.content.delete(document_id)).await?;
            }
            self.store_call(self.metadata.delete(document_id)).await
        }
        .await;

        match rollback {
            Ok(()) => cause,
            Err(rollback_error) => {
                error!(
                    document_id = %document_id,
                    error = %rollback_error,
                    "create rollback failed; stores need manual reconciliation"
                );
                CoreError::Inconsistent(format!(
                    "rollback after failed create ({cause}) left partial state for document {document_id}: {rollback_error}"
                ))
            }
        }
    }

    async fn update(
        &self,
        claims: Claims,
        document_id: Uuid,
        patch: MetadataPatch,
        content: Option<ContentUpdate>,
    ) -> Result<DocumentMetadata, CoreError> {
        if patch.is_empty() && content.is_none() {
            return Err(CoreError::InvalidArgument(
                "update carries no changes".to_string(),
            ));
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(CoreError::InvalidArgument(
                    "document title must not be empty".to_string(),
                ));
            }
        }
        if let Some(update) = &content {
            validate_extra(&update.extra)?;
        }

        let _guard = self.try_lock(document_id)?;
        let mut record = self.store_call(self.metadata.get(document_id)).await?;
        if record.org_id != claims.org_id {
            return Err(CoreError::Forbidden(format!(
                "document {document_id} belongs to another organization"
            )));
        }

        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(kind) = patch.kind {
            record.kind = kind;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        record.updated_at = Utc::now();

        let Some(update) = content else {
            self.store_call(self.metadata.update(&record)).await?;
            return Ok(record);
        };

        self.store_call(self.content.upsert(
            document_id,
            &update.content,
            &update.extra,
            claims.user_id,
        ))
        .await?;

        match self.index_chunks(&record, &update.content).await {
            Ok(chunk_count) => {
                record.search_stale = false;
                info!(document_id = %document_id, chunk_count, "document content updated");
            }
            Err(chunk_error) => {
                // The version entry just written is never rolled back; the
                // document is flagged stale for search instead.
                warn!(
                    document_id = %document_id,
                    error = %chunk_error,
                    "chunk regeneration failed; flagging document stale for search"
                );
                record.search_stale = true;
            }
        }

        self.store_call(self.metadata.update(&record)).await?;
        Ok(record)
    }

    async fn reindex(&self, claims: Claims, document_id: Uuid) -> Result<DocumentMetadata, CoreError> {
        let _guard = self.try_lock(document_id)?;
        let mut record = self.store_call(self.metadata.get(document_id)).await?;
        if record.org_id != claims.org_id {
            return Err(CoreError::Forbidden(format!(
                "document {document_id} belongs to another organization"
            )));
        }

        let current = self.fetch_content(document_id).await?;
        let chunk_count = self.index_chunks(&record, &current.content).await?;

        if record.search_stale {
            record.search_stale = false;
            record.updated_at = Utc::now();
            self.store_call(self.metadata.update(&record)).await?;
        }

        info!(document_id = %document_id, chunk_count, "search index rebuilt");
        Ok(record)
    }

    async fn delete(&self, claims: Claims, document_id: Uuid) -> Result<(), CoreError> {
        let _guard = self.try_lock(document_id)?;
        let record = self.store_call(self.metadata.get(document_id)).await?;
        if record.org_id != claims.org_id {
            return Err(CoreError::Forbidden(format!(
                "document {document_id} belongs to another organization"
            )));
        }

        // Vector chunks first, metadata last: a crash mid-way leaves at
        // worst an orphaned metadata row, which stays visible in listings
        // and can simply be deleted again.
        self.store_call(self.vectors.delete_chunks(document_id)).await?;
        self.store_call(self.content.delete(document_id)).await?;
        self.store_call(self.metadata.delete(document_id)).await?;

        info!(document_id = %document_id, "document deleted");
        Ok(())
    }

    async fn get(
        &self,
        claims: Claims,
        document_id: Uuid,
    ) -> Result<(DocumentMetadata, DocumentContent), CoreError> {
        let record = self.store_call(self.metadata.get(document_id)).await?;
        if record.org_id != claims.org_id {
            return Err(CoreError::Forbidden(format!(
                "document {document_id} belongs to another organization"
            )));
        }
        let content = self.fetch_content(document_id).await?;
        Ok((record, content))
    }

    async fn version_history(
        &self,
        claims: Claims,
        document_id: Uuid,
    ) -> Result<Vec<VersionEntry>, CoreError> {
        let record = self.store_call(self.metadata.get(document_id)).await?;
        if record.org_id != claims.org_id {
            return Err(CoreError::Forbidden(format!(
                "document {document_id} belongs to another organization"
            )));
        }
        match self.store_call(self.content.version_history(document_id)).await {
            Err(CoreError::NotFound(_)) => Err(self.missing_content(document_id)),
            other => other,
        }
    }

    async fn search(
        &self,
        claims: Claims,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, CoreError> {
        if query.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_texts = [query.to_string()];
        let mut vectors = self.embed_with_retry(&query_texts).await?;
        let query_vector = vectors.pop().ok_or_else(|| {
            CoreError::EmbeddingUnavailable("embedder returned no query vector".to_string())
        })?;

        let fetch = top_k.saturating_mul(self.config.search_overfetch.max(1));
        let hits = self
            .store_call(self.vectors.search(&query_vector, claims.org_id, fetch))
            .await?;

        let mut results = Vec::new();
        for hit in hits {
            if results.len() == top_k {
                break;
            }
            let record = match self.store_call(self.metadata.get(hit.document_id)).await {
                Ok(record) => record,
                // Tombstone safety: the chunk outlived its metadata row.
                Err(CoreError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            };
            if record.org_id != claims.org_id {
                continue;
            }
            results.push(SearchHit {
                document_id: record.id,
                title: record.title,
                kind: record.kind,
                chunk_text: hit.chunk_text,
                score: hit.score,
            });
        }

        Ok(results)
    }

    async fn index_chunks(
        &self,
        record: &DocumentMetadata,
        content: &str,
    ) -> Result<usize, CoreError> {
        let spans = chunk_text(content, &self.config.chunking)?;
        let texts: Vec<String> = spans.iter().map(|span| span.text.clone()).collect();
        let embeddings = self.embed_with_retry(&texts).await?;

        let chunks: Vec<EmbeddingChunk> = spans
            .into_iter()
            .zip(embeddings)
            .map(|(span, embedding)| EmbeddingChunk {
                id: EmbeddingChunk::deterministic_id(record.id, span.index, &span.text),
                document_id: record.id,
                org_id: record.org_id,
                index: span.index,
                text: span.text,
                embedding,
            })
            .collect();

        let chunk_count = chunks.len();
        self.store_call(self.vectors.replace_chunks(record.id, &chunks)).await?;
        Ok(chunk_count)
    }

    /// Transient embedding outages are retried with bounded exponential
    /// backoff; anything else surfaces immediately.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut delay = self.config.embed_backoff_base;
        let mut last_outage = None;

        for attempt in 1..=self.config.embed_attempts {
            match timeout(self.config.embed_timeout, self.embedder.embed_batch(texts)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(CoreError::EmbeddingUnavailable(details))) => {
                    warn!(attempt, details = %details, "embedding attempt failed");
                    last_outage = Some(details);
                }
                Ok(Err(other)) => return Err(other),
                Err(_) => {
                    warn!(attempt, "embedding attempt timed out");
                    last_outage = Some(format!(
                        "timed out after {:?}",
                        self.config.embed_timeout
                    ));
                }
            }

            if attempt < self.config.embed_attempts {
                sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(CoreError::EmbeddingUnavailable(
            last_outage.unwrap_or_else(|| "retries exhausted".to_string()),
        ))
    }

    /// Timeout wraps every store call; an elapsed timer is handled exactly
    /// like an explicit store failure.
    async fn store_call<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CoreError> {
        match timeout(self.config.store_timeout, operation).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => Err(CoreError::StoreUnavailable(format!(
                "store call timed out after {:?}",
                self.config.store_timeout
            ))),
        }
    }

    async fn fetch_content(&self, document_id: Uuid) -> Result<DocumentContent, CoreError> {
        match self.store_call(self.content.get(document_id)).await {
            Err(CoreError::NotFound(_)) => Err(self.missing_content(document_id)),
            other => other,
        }
    }

    fn missing_content(&self, document_id: Uuid) -> CoreError {
        error!(document_id = %document_id, "metadata row exists but the content record is missing");
        CoreError::Inconsistent(format!(
            "metadata exists for document {document_id} but the content record is missing"
        ))
    }

    fn try_lock(&self, document_id: Uuid) -> Result<OwnedMutexGuard<()>, CoreError> {
        let lock = self
            .locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().map_err(|_| {
            CoreError::Conflict(format!(
                "document {document_id} is being modified by another caller"
            ))
        })
    }
}
