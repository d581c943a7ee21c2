use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub org_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(email: impl Into<String>, role: Role, org_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            role,
            status: UserStatus::Active,
            org_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Accounts are never hard-deleted; documents keep pointing at the owner.
    pub fn disable(&mut self) {
        self.status = UserStatus::Disabled;
        self.updated_at = Utc::now();
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.updated_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn claims(&self) -> Claims {
        Claims {
            user_id: self.id,
            org_id: self.org_id,
            role: self.role,
        }
    }
}

/// Pre-authenticated identity handed down from the API layer. The core
/// trusts `org_id` as already verified.
#[derive(Debug, Clone, Copy)]
pub struct Claims {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Sop,
    RiskRegister,
    RoleChart,
    ProcessManual,
    ArchitectureDiagram,
    IncidentLog,
    VendorContract,
    Policy,
    DrBcpPlan,
    ChatHistory,
    ExternalDocument,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 11] = [
        DocumentKind::Sop,
        DocumentKind::RiskRegister,
        DocumentKind::RoleChart,
        DocumentKind::ProcessManual,
        DocumentKind::ArchitectureDiagram,
        DocumentKind::IncidentLog,
        DocumentKind::VendorContract,
        DocumentKind::Policy,
        DocumentKind::DrBcpPlan,
        DocumentKind::ChatHistory,
        DocumentKind::ExternalDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Sop => "SOP",
            DocumentKind::RiskRegister => "RISK_REGISTER",
            DocumentKind::RoleChart => "ROLE_CHART",
            DocumentKind::ProcessManual => "PROCESS_MANUAL",
            DocumentKind::ArchitectureDiagram => "ARCHITECTURE_DIAGRAM",
            DocumentKind::IncidentLog => "INCIDENT_LOG",
            DocumentKind::VendorContract => "VENDOR_CONTRACT",
            DocumentKind::Policy => "POLICY",
            DocumentKind::DrBcpPlan => "DR_BCP_PLAN",
            DocumentKind::ChatHistory => "CHAT_HISTORY",
            DocumentKind::ExternalDocument => "EXTERNAL_DOCUMENT",
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_uppercase().replace('-', "_");
        DocumentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown document kind: {raw}")))
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: Uuid,
    pub title: String,
    pub kind: DocumentKind,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner_id: Uuid,
    pub org_id: Uuid,
    /// Set when chunk regeneration failed after a content update; the
    /// content is current but the vector index is not.
    pub search_stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub content: String,
    pub extra: Map<String, Value>,
    pub author: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContent {
    pub document_id: Uuid,
    pub content: String,
    pub extra: Map<String, Value>,
    pub updated_by: Uuid,
    pub updated_at: DateTime<Utc>,
    /// Append-only, oldest first. The current content is never stored here.
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub org_id: Uuid,
    pub index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl EmbeddingChunk {
    /// Stable id for a chunk generation: identical (document, index, text)
    /// always hashes to the same id.
    pub fn deterministic_id(document_id: Uuid, index: u32, text: &str) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(index.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: Uuid,
    pub title: String,
    pub kind: DocumentKind,
    pub chunk_text: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub title: String,
    pub kind: DocumentKind,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub content: String,
    pub extra: Map<String, Value>,
}

impl DocumentDraft {
    pub fn new(title: impl Into<String>, kind: DocumentKind, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind,
            description: None,
            tags: Vec::new(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "document title must not be empty".to_string(),
            ));
        }
        validate_extra(&self.extra)
    }
}

/// New content for an update, together with the type-specific payload that
/// replaces the record's extra map.
#[derive(Debug, Clone)]
pub struct ContentUpdate {
    pub content: String,
    pub extra: Map<String, Value>,
}

impl ContentUpdate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub kind: Option<DocumentKind>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.kind.is_none()
            && self.description.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataFilters {
    pub kind: Option<DocumentKind>,
    pub title_contains: Option<String>,
    /// Only documents flagged stale-for-search, for reindex sweeps.
    pub stale_only: bool,
}

/// The type-specific payload is an open map, but known keys must carry the
/// shapes the rest of the system relies on.
pub fn validate_extra(extra: &Map<String, Value>) -> Result<(), CoreError> {
    for (key, value) in extra {
        if key.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "extra metadata keys must not be empty".to_string(),
            ));
        }
        if value.is_null() {
            return Err(CoreError::InvalidArgument(format!(
                "extra metadata key {key} must not be null"
            )));
        }
        match key.as_str() {
            "file_format" | "description" | "checksum" => {
                if !value.is_string() {
                    return Err(CoreError::InvalidArgument(format!(
                        "extra metadata key {key} must be a string"
                    )));
                }
            }
            "tags" => {
                let valid = value
                    .as_array()
                    .is_some_and(|tags| tags.iter().all(Value::is_string));
                if !valid {
                    return Err(CoreError::InvalidArgument(
                        "extra metadata key tags must be an array of strings".to_string(),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_to_wire_values() {
        let encoded = serde_json::to_string(&DocumentKind::DrBcpPlan).unwrap();
        assert_eq!(encoded, "\"DR_BCP_PLAN\"");

        let decoded: DocumentKind = serde_json::from_str("\"RISK_REGISTER\"").unwrap();
        assert_eq!(decoded, DocumentKind::RiskRegister);
    }

    #[test]
    fn kind_parses_from_relaxed_input() {
        let parsed: DocumentKind = "dr-bcp-plan".parse().unwrap();
        assert_eq!(parsed, DocumentKind::DrBcpPlan);
        assert!("blueprint".parse::<DocumentKind>().is_err());
    }

    #[test]
    fn disabling_a_user_is_a_soft_transition() {
        let org = Organization::new("Acme");
        let mut user = UserAccount::new("ops@acme.test", Role::Manager, org.id);
        assert!(user.is_active());

        user.disable();
        assert_eq!(user.status, UserStatus::Disabled);
        assert_eq!(user.email, "ops@acme.test");
    }

    #[test]
    fn chunk_ids_are_deterministic_and_distinct() {
        let doc = Uuid::new_v4();
        let first = EmbeddingChunk::deterministic_id(doc, 0, "alpha");
        let again = EmbeddingChunk::deterministic_id(doc, 0, "alpha");
        let other = EmbeddingChunk::deterministic_id(doc, 1, "alpha");
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn extra_map_rejects_bad_known_keys() {
        let mut extra = Map::new();
        extra.insert("file_format".to_string(), json!(42));
        assert!(validate_extra(&extra).is_err());

        let mut extra = Map::new();
        extra.insert("tags".to_string(), json!(["dr", "critical"]));
        extra.insert("severity".to_string(), json!("high"));
        assert!(validate_extra(&extra).is_ok());

        let mut extra = Map::new();
        extra.insert("anything".to_string(), Value::Null);
        assert!(validate_extra(&extra).is_err());
    }

    #[test]
    fn empty_draft_title_is_rejected() {
        let draft = DocumentDraft::new("  ", DocumentKind::Policy, "body");
        assert!(draft.validate().is_err());
    }
}
