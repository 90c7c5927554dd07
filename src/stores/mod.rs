//! Storage abstractions for the three backing stores.
//!
//! One logical document is jointly represented by three independently
//! scaling stores, each behind its own trait:
//!
//! | Trait | Role | Repairability |
//! |-------|------|---------------|
//! | [`ObjectArchive`] | content-addressed blob store | append-only, never repaired |
//! | [`SearchIndex`] | lexical + vector index | derived projection, self-heals |
//! | [`MetadataStore`] | relational records, FK integrity | source of truth |
//!
//! No distributed transaction spans the three; the tri-store writer
//! substitutes ordering and idempotency for atomicity (see
//! [`crate::writer`]). All operations are async and may suspend; failures
//! carry a transient/permanent classification via
//! [`StoreError`](crate::error::StoreError).

pub mod fs;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{
    Chunk, ChunkVersion, Document, DocumentStatus, DocumentVersion, ImageAssociation,
    ImageRecord, IndexState, SyncState, VersionMember,
};

/// Content-addressed blob store. Keys are derived from a strong hash of the
/// bytes, so writes are idempotent and the archive is append-only.
#[async_trait]
pub trait ObjectArchive: Send + Sync {
    /// Store bytes under a content-derived key; returns the reference.
    /// Re-putting an existing key is a no-op returning the same reference.
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<String>;

    /// Fetch bytes by reference.
    async fn get(&self, reference: &str) -> StoreResult<Vec<u8>>;

    /// Whether an object with this key already exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;
}

/// One row of the search index: the searchable text (and optional vector)
/// of a chunk or image association, tagged with the chunk-version it was
/// built from so stale entries can be filtered out at query time.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Chunk id or image-association id; upserts are idempotent on this.
    pub id: String,
    pub document_id: String,
    /// Version tag: the chunk-version id this text/vector was derived from.
    pub version_id: String,
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

/// A scored hit from one retrieval channel.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub document_id: String,
    pub version_id: String,
    pub score: f64,
    pub snippet: String,
}

/// Query-time filters applied inside the index.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub document_id: Option<String>,
}

/// Document + vector index supporting bulk upsert, lexical query, and k-NN
/// query. Always allowed to be transiently stale; self-heals from the
/// metadata store.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert-or-replace entries by id.
    async fn bulk_upsert(&self, entries: &[IndexEntry]) -> StoreResult<()>;

    async fn query_lexical(
        &self,
        query: &str,
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>>;

    async fn query_vector(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>>;

    async fn delete(&self, ids: &[String]) -> StoreResult<()>;
}

/// Relational store over Document / DocumentVersion / Chunk / ChunkVersion /
/// Image records with transactional pointer flips and soft deletes. This is
/// the single source of truth for "what should be indexed".
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ---- documents ----

    async fn insert_document(&self, doc: &Document) -> StoreResult<()>;

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Look up a non-deleted document by its source name (e.g. a file path).
    async fn find_document_by_source(&self, source_name: &str) -> StoreResult<Option<Document>>;

    async fn list_documents(&self) -> StoreResult<Vec<Document>>;

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()>;

    async fn update_document_content_hash(&self, id: &str, content_hash: &str) -> StoreResult<()>;

    async fn soft_delete_document(&self, id: &str) -> StoreResult<()>;

    // ---- document versions ----

    /// Insert an immutable version record together with any newly created
    /// chunks, their initial chunk versions, and the full ordered
    /// membership of the version — in one transaction. Newly created chunk
    /// rows are staged as superseded so readers do not observe them before
    /// promotion.
    async fn stage_version(
        &self,
        version: &DocumentVersion,
        new_chunks: &[Chunk],
        new_chunk_versions: &[ChunkVersion],
        members: &[VersionMember],
    ) -> StoreResult<()>;

    /// Atomically flip the document's current-version pointer and apply the
    /// version's membership: member chunks become live with their recorded
    /// index/position, everything else is superseded. Must be the last step
    /// of a version-creating operation.
    async fn promote_version(&self, document_id: &str, version_id: &str) -> StoreResult<()>;

    async fn get_document_version(&self, id: &str) -> StoreResult<Option<DocumentVersion>>;

    /// Highest allocated version number for a document; 0 when none exist.
    async fn latest_version_number(&self, document_id: &str) -> StoreResult<i64>;

    async fn list_document_versions(
        &self,
        document_id: &str,
        include_archived: bool,
    ) -> StoreResult<Vec<DocumentVersion>>;

    /// Retention: mark all but the most recent `keep` versions as archived.
    async fn archive_versions_over(&self, document_id: &str, keep: i64) -> StoreResult<()>;

    /// Ordered membership of one version.
    async fn version_members(&self, version_id: &str) -> StoreResult<Vec<VersionMember>>;

    // ---- chunks ----

    async fn get_chunk(&self, id: &str) -> StoreResult<Option<Chunk>>;

    /// Live chunks of a document, ordered by `chunk_index`.
    async fn list_current_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>>;

    async fn get_chunk_version(&self, id: &str) -> StoreResult<Option<ChunkVersion>>;

    async fn list_chunk_versions(&self, chunk_id: &str) -> StoreResult<Vec<ChunkVersion>>;

    /// Insert an immutable chunk version and flip the chunk's current
    /// pointer in the same transaction (single-chunk edits are small enough
    /// for one transaction, unlike whole-document re-chunks).
    async fn push_chunk_version(&self, version: &ChunkVersion) -> StoreResult<()>;

    async fn set_index_state(&self, chunk_id: &str, state: IndexState) -> StoreResult<()>;

    /// Chunks whose search-index entry is known to lag the metadata store.
    async fn list_stale_chunks(&self) -> StoreResult<Vec<Chunk>>;

    // ---- images ----

    async fn get_image(&self, hash: &str) -> StoreResult<Option<ImageRecord>>;

    async fn insert_image(&self, image: &ImageRecord) -> StoreResult<()>;

    async fn insert_image_association(&self, assoc: &ImageAssociation) -> StoreResult<()>;

    /// Placements of images within a document, in insertion order.
    async fn list_image_associations(&self, document_id: &str)
        -> StoreResult<Vec<ImageAssociation>>;

    /// All placements of one physical image across documents.
    async fn list_associations_for_image(
        &self,
        image_hash: &str,
    ) -> StoreResult<Vec<ImageAssociation>>;

    // ---- sync state ----

    async fn get_sync_state(
        &self,
        source: &str,
        resource_type: &str,
        scope: &str,
    ) -> StoreResult<Option<SyncState>>;

    async fn set_sync_state(&self, state: &SyncState) -> StoreResult<()>;
}
