use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DocumentContent, VersionEntry};
use crate::traits::ContentStore;

/// Content records live in a CouchDB database, one document per record,
/// keyed by the document id. CouchDB's `_rev` token gives compare-and-swap
/// semantics: a lost race surfaces as 409 and maps to `StoreError::Conflict`.
pub struct CouchDbContentStore {
    client: Client,
    endpoint: String,
    database: String,
    username: String,
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CouchRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    #[serde(flatten)]
    body: DocumentContent,
}

impl CouchDbContentStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn record_url(&self, document_id: Uuid) -> String {
        format!("{}/{}/{}", self.endpoint, self.database, document_id)
    }

    pub async fn ensure_database(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/{}", self.endpoint, self.database))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        // 412 means the database already exists.
        if !response.status().is_success()
            && response.status() != StatusCode::PRECONDITION_FAILED
        {
            return Err(StoreError::BackendResponse {
                backend: "couchdb".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn fetch(&self, document_id: Uuid) -> Result<Option<CouchRecord>, StoreError> {
        let response = self
            .client
            .get(self.record_url(document_id))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "couchdb".to_string(),
                details: response.status().to_string(),
            });
        }

        let record: CouchRecord = response.json().await?;
        Ok(Some(record))
    }

    async fn put(&self, record: &CouchRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/{}/{}", self.endpoint, self.database, record.id))
            .basic_auth(&self.username, Some(&self.password))
            .json(record)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(format!(
                "content record {} was modified concurrently",
                record.id
            )));
        }

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "couchdb".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ContentStore for CouchDbContentStore {
    async fn upsert(
        &self,
        document_id: Uuid,
        content: &str,
        extra: &Map<String, Value>,
        author: Uuid,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let record = match self.fetch(document_id).await? {
            Some(mut existing) => {
                let snapshot = VersionEntry {
                    content: std::mem::take(&mut existing.body.content),
                    extra: std::mem::take(&mut existing.body.extra),
                    author: existing.body.updated_by,
                    recorded_at: now,
                };
                existing.body.versions.push(snapshot);
                existing.body.content = content.to_string();
                existing.body.extra = extra.clone();
                existing.body.updated_by = author;
                existing.body.updated_at = now;
                existing
            }
            None => CouchRecord {
                id: document_id.to_string(),
                rev: None,
                body: DocumentContent {
                    document_id,
                    content: content.to_string(),
                    extra: extra.clone(),
                    updated_by: author,
                    updated_at: now,
                    versions: Vec::new(),
                },
            },
        };

        self.put(&record).await
    }

    async fn get(&self, document_id: Uuid) -> Result<DocumentContent, StoreError> {
        self.fetch(document_id)
            .await?
            .map(|record| record.body)
            .ok_or_else(|| StoreError::NotFound(format!("document content {document_id}")))
    }

    async fn version_history(&self, document_id: Uuid) -> Result<Vec<VersionEntry>, StoreError> {
        Ok(self.get(document_id).await?.versions)
    }

    async fn delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        let Some(record) = self.fetch(document_id).await? else {
            return Ok(());
        };
        let Some(rev) = record.rev else {
            return Ok(());
        };

        let response = self
            .client
            .delete(format!("{}?rev={}", self.record_url(document_id), rev))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(format!(
                "content record {document_id} was modified concurrently"
            )));
        }

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "couchdb".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}
