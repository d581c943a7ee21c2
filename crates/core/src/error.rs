use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("metadata and content stores disagree: {0}")]
    Inconsistent(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl CoreError {
    /// Stable machine-readable kind, independent of the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Conflict(_) => "conflict",
            CoreError::EmbeddingUnavailable(_) => "embedding_unavailable",
            CoreError::StoreUnavailable(_) => "store_unavailable",
            CoreError::Inconsistent(_) => "inconsistent",
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::InvalidChunkConfig(_) => "invalid_chunk_config",
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(details) => CoreError::NotFound(details),
            StoreError::Conflict(details) => CoreError::Conflict(details),
            StoreError::Unavailable(details) => CoreError::StoreUnavailable(details),
            StoreError::BackendResponse { backend, details } => {
                CoreError::StoreUnavailable(format!("{backend}: {details}"))
            }
            StoreError::Http(error) => CoreError::StoreUnavailable(error.to_string()),
            StoreError::Url(error) => CoreError::StoreUnavailable(error.to_string()),
            StoreError::Serialization(error) => CoreError::StoreUnavailable(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, StoreError};

    #[test]
    fn store_not_found_maps_to_core_not_found() {
        let mapped = CoreError::from(StoreError::NotFound("doc-1".to_string()));
        assert!(matches!(mapped, CoreError::NotFound(_)));
        assert_eq!(mapped.kind(), "not_found");
    }

    #[test]
    fn backend_response_maps_to_store_unavailable() {
        let mapped = CoreError::from(StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "503".to_string(),
        });
        assert!(matches!(mapped, CoreError::StoreUnavailable(_)));
        assert!(mapped.to_string().contains("qdrant"));
    }
}
