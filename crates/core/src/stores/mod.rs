pub mod couchdb;
pub mod memory;
pub mod opensearch;
pub mod qdrant;

pub use couchdb::CouchDbContentStore;
pub use memory::{MemoryContentStore, MemoryMetadataStore, MemoryVectorIndex};
pub use opensearch::OpenSearchMetadataStore;
pub use qdrant::QdrantVectorIndex;
