use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::coordinator::DocumentCoordinator;
use crate::embeddings::Embedder;
use crate::error::CoreError;
use crate::models::{Claims, DocumentDraft, DocumentKind, DocumentMetadata};
use crate::traits::{ContentStore, MetadataStore, VectorIndex};

const IMPORTABLE_EXTENSIONS: [&str; 2] = ["txt", "md"];

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let importable = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMPORTABLE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });

        if importable {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_text(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct ImportReport {
    pub created: Vec<DocumentMetadata>,
    pub skipped: Vec<SkippedFile>,
}

/// Imports every `.txt`/`.md` file under `folder` as a document owned by the
/// caller. Unreadable files are reported, not fatal.
pub async fn import_folder_best_effort<M, C, V, E>(
    coordinator: &DocumentCoordinator<M, C, V, E>,
    claims: Claims,
    folder: &Path,
    kind: DocumentKind,
) -> Result<ImportReport, CoreError>
where
    M: MetadataStore + 'static,
    C: ContentStore + 'static,
    V: VectorIndex + 'static,
    E: Embedder + 'static,
{
    let files = discover_text_files(folder);

    if files.is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "no importable files found in {}",
            folder.display()
        )));
    }

    let mut created = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        match import_file(coordinator, claims, &path, kind).await {
            Ok(record) => created.push(record),
            Err(error) => skipped.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(ImportReport { created, skipped })
}

async fn import_file<M, C, V, E>(
    coordinator: &DocumentCoordinator<M, C, V, E>,
    claims: Claims,
    path: &Path,
    kind: DocumentKind,
) -> Result<DocumentMetadata, CoreError>
where
    M: MetadataStore + 'static,
    C: ContentStore + 'static,
    V: VectorIndex + 'static,
    E: Embedder + 'static,
{
    let content = fs::read_to_string(path).map_err(|error| {
        CoreError::InvalidArgument(format!("unreadable file {}: {error}", path.display()))
    })?;

    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            CoreError::InvalidArgument(format!("path missing filename: {}", path.display()))
        })?;

    let mut draft = DocumentDraft::new(title, kind, content);
    draft
        .extra
        .insert("checksum".to_string(), json!(digest_text(&draft.content)));
    draft
        .extra
        .insert("file_format".to_string(), json!("text"));

    coordinator.create_document(claims, draft).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::models::Role;
    use crate::stores::{MemoryContentStore, MemoryMetadataStore, MemoryVectorIndex};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn coordinator() -> DocumentCoordinator<
        MemoryMetadataStore,
        MemoryContentStore,
        MemoryVectorIndex,
        HashingEmbedder,
    > {
        DocumentCoordinator::new(
            MemoryMetadataStore::default(),
            MemoryContentStore::default(),
            MemoryVectorIndex::default(),
            HashingEmbedder::default(),
        )
    }

    fn claims() -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    #[test]
    fn discovery_is_recursive_and_extension_filtered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        std::fs::create_dir(&nested)?;

        std::fs::write(base.join("plan.txt"), "failover plan")?;
        std::fs::write(nested.join("register.md"), "# risks")?;
        std::fs::write(base.join("scan.pdf"), b"%PDF-1.4")?;

        let files = discover_text_files(base);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "txt" || ext == "md")
        }));
        Ok(())
    }

    #[test]
    fn checksums_are_reproducible() {
        assert_eq!(digest_text("abc"), digest_text("abc"));
        assert_ne!(digest_text("abc"), digest_text("abd"));
    }

    #[tokio::test]
    async fn import_creates_documents_with_checksums() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("plan.txt"), "failover to secondary site")?;
        std::fs::write(dir.path().join("register.md"), "# top risks")?;

        let coordinator = coordinator();
        let claims = claims();
        let report =
            import_folder_best_effort(&coordinator, claims, dir.path(), DocumentKind::ExternalDocument)
                .await?;

        assert_eq!(report.created.len(), 2);
        assert!(report.skipped.is_empty());

        let (_, content) = coordinator
            .get_document(claims, report.created[0].id)
            .await?;
        assert_eq!(
            content.extra.get("checksum").and_then(|value| value.as_str()),
            Some(digest_text("failover to secondary site").as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("good.txt"), "readable")?;
        File::create(dir.path().join("bad.txt"))
            .and_then(|mut file| file.write_all(&[0xff, 0xfe, 0x00, 0x9f]))?;

        let coordinator = coordinator();
        let report =
            import_folder_best_effort(&coordinator, claims(), dir.path(), DocumentKind::ExternalDocument)
                .await?;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("bad.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let coordinator = coordinator();
        let result =
            import_folder_best_effort(&coordinator, claims(), dir.path(), DocumentKind::ExternalDocument)
                .await;
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
        Ok(())
    }
}
