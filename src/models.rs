//! Core data models used throughout Quire.
//!
//! These types represent the documents, versions, chunks, and images that
//! flow through the ingestion, versioning, and retrieval pipeline. Version
//! records ([`DocumentVersion`], [`ChunkVersion`]) are immutable once
//! written; the only mutable shared state is the pair of "current version"
//! pointers on [`Document`] and [`Chunk`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// Whether the search index's copy of a chunk matches the metadata store.
///
/// `Stale` means a single-chunk edit updated the metadata store but the
/// search-index upsert failed; a repair pass re-reads the metadata store
/// (the source of truth) and brings the index back in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Fresh,
    Stale,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Fresh => "fresh",
            IndexState::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(IndexState::Fresh),
            "stale" => Some(IndexState::Stale),
            _ => None,
        }
    }
}

/// Content type tag of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkType {
    Text,
    Code,
    Table,
    Quote,
    ImageRef,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Code => "code",
            ChunkType::Table => "table",
            ChunkType::Quote => "quote",
            ChunkType::ImageRef => "image-ref",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ChunkType::Text),
            "code" => Some(ChunkType::Code),
            "table" => Some(ChunkType::Table),
            "quote" => Some(ChunkType::Quote),
            "image-ref" => Some(ChunkType::ImageRef),
            _ => None,
        }
    }
}

/// A logical document. Created on upload; soft-deleted, never physically
/// removed while a version references it.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: Option<String>,
    pub source_name: String,
    /// SHA-256 of the uploaded source bytes; also the object-archive key
    /// under which the raw upload is stored.
    pub content_hash: String,
    pub status: DocumentStatus,
    pub current_version_id: Option<String>,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Immutable snapshot descriptor for one published chunk set of a document.
#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub version_number: i64,
    /// Object-archive reference of the gzip JSONL chunk artifact.
    pub archive_ref: String,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
    /// Retention flag: archived versions are excluded from default listings
    /// but remain retrievable.
    pub archived: bool,
}

/// A retrievable unit of document content.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position within the document's current version.
    pub chunk_index: i64,
    pub chunk_type: ChunkType,
    pub current_version_id: String,
    /// Position range in the original extracted element sequence.
    /// `None` for legacy chunks that predate element indexing.
    pub element_index_start: Option<i64>,
    pub element_index_end: Option<i64>,
    pub index_state: IndexState,
    /// Set when a re-chunk dropped this chunk from the current version.
    pub superseded: bool,
}

/// Structural metadata carried by each chunk version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub heading_path: Vec<String>,
    #[serde(default)]
    pub heading_level: i64,
    #[serde(default)]
    pub line_start: i64,
    #[serde(default)]
    pub line_end: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index_end: Option<i64>,
}

/// Immutable content snapshot of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkVersion {
    pub id: String,
    pub chunk_id: String,
    /// Monotonically increasing per chunk, starting at 1.
    pub version_number: i64,
    pub text: String,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

/// Ordered membership of one chunk in one document version.
///
/// Also carries the position metadata promote applies to the chunk row: a
/// chunk that moved without changing content keeps its identity and version
/// but still gets fresh `chunk_index` and element range on promotion.
#[derive(Debug, Clone)]
pub struct VersionMember {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub chunk_version_id: String,
    pub content_hash: String,
    pub element_index_start: Option<i64>,
    pub element_index_end: Option<i64>,
}

/// A physical image record, one per distinct content hash regardless of how
/// many documents reference it.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub hash: String,
    pub archive_ref: String,
    pub thumbnail_ref: Option<String>,
    pub ocr_text: Option<String>,
    /// Embedding of the OCR text, computed once per distinct hash and
    /// shared by every association's index entry.
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
}

/// Per-document placement of an image. Positional metadata lives here, not
/// on [`ImageRecord`]: the same bytes can sit at different positions in
/// different documents.
#[derive(Debug, Clone)]
pub struct ImageAssociation {
    pub id: String,
    pub image_hash: String,
    pub document_id: String,
    pub page_number: Option<i64>,
    pub coordinates: Option<String>,
    pub element_index: Option<i64>,
    pub created_at: i64,
}

/// Positional metadata supplied when associating an image with a document.
#[derive(Debug, Clone, Default)]
pub struct ImagePlacement {
    pub page_number: Option<i64>,
    pub coordinates: Option<String>,
    pub element_index: Option<i64>,
}

/// Last-seen cursor per (source, resource type, scope), used to drive
/// incremental ingestion and reconciliation.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub source: String,
    pub resource_type: String,
    pub scope: String,
    pub cursor: String,
    pub updated_at: i64,
}

/// Kind of an extracted element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Paragraph,
    Heading { level: i64 },
    CodeBlock { language: Option<String> },
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
    Quote,
    ImageRef { src: String },
}

/// One typed element of the extracted document sequence.
///
/// `element_index` is assigned exactly once at parse time and is monotonic
/// across the whole sequence; it is the key the reconciler later uses to
/// restore original interleaved order.
#[derive(Debug, Clone)]
pub struct Element {
    pub element_index: i64,
    pub kind: ElementKind,
    pub text: String,
    pub line_start: i64,
    pub line_end: i64,
}

/// Output of the chunker: a chunk-to-be, before any identity or version
/// number has been assigned.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chunk_type: ChunkType,
    pub text: String,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

impl ChunkDraft {
    pub fn new(chunk_type: ChunkType, text: String, metadata: ChunkMetadata) -> Self {
        let content_hash = content_hash(text.as_bytes());
        Self {
            chunk_type,
            text,
            content_hash,
            metadata,
        }
    }
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
        assert_eq!(content_hash(b"").len(), 64);
    }

    #[test]
    fn test_chunk_type_round_trip() {
        for t in [
            ChunkType::Text,
            ChunkType::Code,
            ChunkType::Table,
            ChunkType::Quote,
            ChunkType::ImageRef,
        ] {
            assert_eq!(ChunkType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ChunkType::parse("unknown"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
    }
}
