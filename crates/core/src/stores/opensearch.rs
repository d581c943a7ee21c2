use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DocumentMetadata, MetadataFilters};
use crate::traits::MetadataStore;

/// Metadata rows live in a single OpenSearch index, one document per
/// metadata record, keyed by the document id.
pub struct OpenSearchMetadataStore {
    client: Client,
    endpoint: String,
    index_name: String,
}

impl OpenSearchMetadataStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            index_name: index_name.into(),
        }
    }

    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .head(format!("{}/{}", self.endpoint, self.index_name))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/{}", self.endpoint, self.index_name))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "id": {"type": "keyword"},
                        "title": {"type": "text"},
                        "kind": {"type": "keyword"},
                        "description": {"type": "text"},
                        "tags": {"type": "keyword"},
                        "owner_id": {"type": "keyword"},
                        "org_id": {"type": "keyword"},
                        "search_stale": {"type": "boolean"},
                        "created_at": {"type": "date"},
                        "updated_at": {"type": "date"}
                    }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: format!("index setup failed with {}", response.status()),
            });
        }

        Ok(())
    }

    async fn put_record(&self, record: &DocumentMetadata) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!(
                "{}/{}/_doc/{}?refresh=true",
                self.endpoint, self.index_name, record.id
            ))
            .json(&serde_json::to_value(record)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for OpenSearchMetadataStore {
    async fn insert(&self, record: &DocumentMetadata) -> Result<(), StoreError> {
        self.put_record(record).await
    }

    async fn update(&self, record: &DocumentMetadata) -> Result<(), StoreError> {
        self.put_record(record).await
    }

    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(format!(
                "{}/{}/_doc/{}?refresh=true",
                self.endpoint, self.index_name, document_id
            ))
            .send()
            .await?;

        // 404 means the row is already gone; compensating deletes re-run.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<DocumentMetadata, StoreError> {
        let response = self
            .client
            .get(format!(
                "{}/{}/_doc/{}",
                self.endpoint, self.index_name, document_id
            ))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!(
                "document metadata {document_id}"
            )));
        }

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let source = body.pointer("/_source").cloned().ok_or_else(|| {
            StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: "document response missing _source".to_string(),
            }
        })?;

        Ok(serde_json::from_value(source)?)
    }

    async fn list_by_organization(
        &self,
        org_id: Uuid,
        filters: &MetadataFilters,
    ) -> Result<Vec<DocumentMetadata>, StoreError> {
        let mut predicates = vec![json!({"term": {"org_id": org_id.to_string()}})];
        if let Some(kind) = filters.kind {
            predicates.push(json!({"term": {"kind": kind.as_str()}}));
        }
        if filters.stale_only {
            predicates.push(json!({"term": {"search_stale": true}}));
        }

        let mut query = json!({
            "size": 1_000,
            "sort": [{"updated_at": {"order": "desc"}}],
            "query": {
                "bool": {
                    "filter": predicates
                }
            }
        });

        if let Some(needle) = &filters.title_contains {
            query["query"]["bool"]["must"] = json!([{"match": {"title": needle}}]);
        }

        let response = self
            .client
            .post(format!(
                "{}/{}/_search",
                self.endpoint, self.index_name
            ))
            .json(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(source) = hit.pointer("/_source") {
                records.push(serde_json::from_value(source.clone())?);
            }
        }

        Ok(records)
    }
}
