use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use resilience_doc_core::{
    import_folder_best_effort, Claims, ContentStore, ContentUpdate, CouchDbContentStore,
    DocumentCoordinator, DocumentDraft, DocumentKind, Embedder, HashingEmbedder, HttpEmbedder,
    MemoryContentStore, MemoryMetadataStore, MemoryVectorIndex, MetadataFilters, MetadataPatch,
    MetadataStore, OpenSearchMetadataStore, QdrantVectorIndex, Role, VectorIndex,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "resilience-docs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Organization the caller belongs to (pre-verified upstream).
    #[arg(long, env = "RESILIENCE_ORG_ID")]
    org: Uuid,

    /// Acting user id (pre-verified upstream).
    #[arg(long, env = "RESILIENCE_USER_ID")]
    user: Uuid,

    /// Caller role: admin, manager, or member.
    #[arg(long, default_value = "manager")]
    role: String,

    /// Keep all state in this process instead of the remote stores.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// OpenSearch base URL (metadata store)
    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index for document metadata
    #[arg(long, default_value = "resilience_documents")]
    opensearch_index: String,

    /// CouchDB base URL (content store)
    #[arg(long, env = "COUCHDB_URL", default_value = "http://localhost:5984")]
    couchdb_url: String,

    /// CouchDB database for document content
    #[arg(long, default_value = "resilience_content")]
    couchdb_database: String,

    /// CouchDB username
    #[arg(long, env = "COUCHDB_USER", default_value = "admin")]
    couchdb_user: String,

    /// CouchDB password
    #[arg(long, env = "COUCHDB_PASSWORD", default_value = "password")]
    couchdb_password: String,

    /// Qdrant base URL (vector index)
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection for chunk embeddings
    #[arg(long, default_value = "resilience_chunks")]
    qdrant_collection: String,

    /// Embedding service base URL; without it a local hashing embedder is used.
    #[arg(long, env = "EMBEDDER_URL")]
    embedder_url: Option<String>,

    /// Embedding vector dimension
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Create a document from a file or inline content.
    Create {
        #[arg(long)]
        title: String,
        /// Document kind, e.g. SOP, RISK_REGISTER, DR_BCP_PLAN.
        #[arg(long)]
        kind: DocumentKind,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
        /// Read content from this file.
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Inline content.
        #[arg(long)]
        content: Option<String>,
        /// Type-specific metadata as a JSON object.
        #[arg(long)]
        extra_json: Option<String>,
    },
    /// Update metadata fields and/or content of a document.
    Update {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        kind: Option<DocumentKind>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        extra_json: Option<String>,
    },
    /// Delete a document from every store.
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    /// Print a document's metadata and current content.
    Get {
        #[arg(long)]
        id: Uuid,
    },
    /// Print a document's version history, oldest first.
    History {
        #[arg(long)]
        id: Uuid,
    },
    /// List the caller's organization documents.
    List {
        #[arg(long)]
        kind: Option<DocumentKind>,
        #[arg(long)]
        title_contains: Option<String>,
        /// Only documents whose search index is stale.
        #[arg(long, default_value_t = false)]
        stale_only: bool,
    },
    /// Semantic search over the organization's documents.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "10")]
        top_k: usize,
    },
    /// Import every .txt/.md file in a folder as documents.
    Import {
        #[arg(long)]
        folder: PathBuf,
        #[arg(long, default_value = "EXTERNAL_DOCUMENT")]
        kind: DocumentKind,
    },
    /// Rebuild the vector index for a document flagged stale.
    Reindex {
        #[arg(long)]
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "resilience-docs boot"
    );

    let claims = Claims {
        user_id: cli.user,
        org_id: cli.org,
        role: parse_role(&cli.role)?,
    };

    let embedder: Box<dyn Embedder> = match &cli.embedder_url {
        Some(endpoint) => Box::new(HttpEmbedder::new(endpoint, cli.embedding_dimensions)?),
        None => Box::new(HashingEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
    };

    if cli.in_memory {
        let coordinator = DocumentCoordinator::new(
            MemoryMetadataStore::default(),
            MemoryContentStore::default(),
            MemoryVectorIndex::default(),
            embedder,
        );
        return run(&coordinator, claims, cli.command).await;
    }

    let metadata = OpenSearchMetadataStore::new(&cli.opensearch_url, &cli.opensearch_index);
    let content = CouchDbContentStore::new(
        &cli.couchdb_url,
        &cli.couchdb_database,
        &cli.couchdb_user,
        &cli.couchdb_password,
    );
    let vectors = QdrantVectorIndex::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        embedder.dimensions(),
    );

    metadata.ensure_index().await?;
    content.ensure_database().await?;
    vectors.ensure_collection().await?;
    info!(
        opensearch = %cli.opensearch_url,
        couchdb = %cli.couchdb_url,
        qdrant = %cli.qdrant_url,
        "stores ready"
    );

    let coordinator = DocumentCoordinator::new(metadata, content, vectors, embedder);
    run(&coordinator, claims, cli.command).await
}

async fn run<M, C, V, E>(
    coordinator: &DocumentCoordinator<M, C, V, E>,
    claims: Claims,
    command: Command,
) -> anyhow::Result<()>
where
    M: MetadataStore + 'static,
    C: ContentStore + 'static,
    V: VectorIndex + 'static,
    E: Embedder + 'static,
{
    match command {
        Command::Create {
            title,
            kind,
            description,
            tags,
            file,
            content,
            extra_json,
        } => {
            let mut draft = DocumentDraft::new(title, kind, read_content(file, content)?);
            draft.description = description;
            draft.tags = tags;
            draft.extra = parse_extra(extra_json)?;

            let record = coordinator.create_document(claims, draft).await?;
            println!("created document {} ({})", record.id, record.kind);
        }
        Command::Update {
            id,
            title,
            kind,
            description,
            file,
            content,
            extra_json,
        } => {
            let patch = MetadataPatch {
                title,
                kind,
                description,
                tags: None,
            };
            let content_update = match (file, content) {
                (None, None) => None,
                (file, content) => Some(ContentUpdate {
                    content: read_content(file, content)?,
                    extra: parse_extra(extra_json)?,
                }),
            };

            let record = coordinator
                .update_document(claims, id, patch, content_update)
                .await?;
            if record.search_stale {
                println!(
                    "updated document {} (search index stale; run reindex)",
                    record.id
                );
            } else {
                println!("updated document {}", record.id);
            }
        }
        Command::Delete { id } => {
            coordinator.delete_document(claims, id).await?;
            println!("deleted document {id}");
        }
        Command::Get { id } => {
            let (record, content) = coordinator.get_document(claims, id).await?;
            println!("id={} kind={} title={}", record.id, record.kind, record.title);
            if let Some(description) = &record.description {
                println!("description={description}");
            }
            if !record.tags.is_empty() {
                println!("tags={}", record.tags.join(","));
            }
            println!(
                "owner={} created_at={} updated_at={} search_stale={}",
                record.owner_id,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.search_stale
            );
            println!("content:\n{}", content.content);
        }
        Command::History { id } => {
            let history = coordinator.get_version_history(claims, id).await?;
            if history.is_empty() {
                println!("no prior versions");
            }
            for (position, entry) in history.iter().enumerate() {
                println!(
                    "[{}] recorded_at={} author={}",
                    position,
                    entry.recorded_at.to_rfc3339(),
                    entry.author
                );
                println!("{}", entry.content);
            }
        }
        Command::List {
            kind,
            title_contains,
            stale_only,
        } => {
            let filters = MetadataFilters {
                kind,
                title_contains,
                stale_only,
            };
            let records = coordinator.list_documents(claims, &filters).await?;
            for record in &records {
                println!(
                    "{} kind={} title={} updated_at={} search_stale={}",
                    record.id,
                    record.kind,
                    record.title,
                    record.updated_at.to_rfc3339(),
                    record.search_stale
                );
            }
            println!("{} document(s)", records.len());
        }
        Command::Search { query, top_k } => {
            let hits = coordinator.search_documents(claims, &query, top_k).await?;
            for hit in &hits {
                println!(
                    "score={:.4} document={} kind={} title={}",
                    hit.score, hit.document_id, hit.kind, hit.title
                );
                println!("  {}", hit.chunk_text);
            }
            if hits.is_empty() {
                println!("no matches");
            }
        }
        Command::Import { folder, kind } => {
            let report = import_folder_best_effort(coordinator, claims, &folder, kind).await?;
            for record in &report.created {
                println!("imported {} as {}", record.title, record.id);
            }
            for skipped in &report.skipped {
                println!("skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            println!(
                "{} imported, {} skipped",
                report.created.len(),
                report.skipped.len()
            );
        }
        Command::Reindex { id } => {
            let record = coordinator.reindex_document(claims, id).await?;
            println!("rebuilt search index for document {}", record.id);
        }
    }

    Ok(())
}

fn parse_role(raw: &str) -> anyhow::Result<Role> {
    match raw.to_lowercase().as_str() {
        "admin" => Ok(Role::Admin),
        "manager" => Ok(Role::Manager),
        "member" => Ok(Role::Member),
        other => anyhow::bail!("unknown role: {other}"),
    }
}

fn read_content(file: Option<PathBuf>, inline: Option<String>) -> anyhow::Result<String> {
    match (file, inline) {
        (Some(path), None) => Ok(std::fs::read_to_string(&path)?),
        (None, Some(content)) => Ok(content),
        (None, None) => anyhow::bail!("either --file or --content is required"),
        (Some(_), Some(_)) => anyhow::bail!("--file and --content are mutually exclusive"),
    }
}

fn parse_extra(raw: Option<String>) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("--extra-json must be a JSON object"))
}
