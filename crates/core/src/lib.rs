pub mod chunking;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod import;
pub mod models;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, normalize_whitespace, ChunkSpan, ChunkingConfig};
pub use coordinator::{CoordinatorConfig, DocumentCoordinator};
pub use embeddings::{Embedder, HashingEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{CoreError, StoreError};
pub use import::{
    digest_text, discover_text_files, import_folder_best_effort, ImportReport, SkippedFile,
};
pub use models::{
    validate_extra, ChunkHit, Claims, ContentUpdate, DocumentContent, DocumentDraft, DocumentKind,
    DocumentMetadata, EmbeddingChunk, MetadataFilters, MetadataPatch, Organization, Role,
    SearchHit, UserAccount, UserStatus, VersionEntry,
};
pub use stores::{
    CouchDbContentStore, MemoryContentStore, MemoryMetadataStore, MemoryVectorIndex,
    OpenSearchMetadataStore, QdrantVectorIndex,
};
pub use traits::{ContentStore, MetadataStore, VectorIndex};
