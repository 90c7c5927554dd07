//! Version ledger: chunk identity matching and version-number allocation.
//!
//! Re-chunking a document produces a fresh set of drafts with no identity.
//! [`plan_rechunk`] matches drafts against the document's live chunks by
//! content hash, position-insensitively: a chunk that moved without
//! changing keeps its id and its current version (and so its embedding),
//! while genuinely new content gets a new chunk at version 1. The plan is
//! pure; the tri-store writer executes it.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{
    Chunk, ChunkDraft, ChunkVersion, DocumentVersion, IndexState, VersionMember,
};
use crate::stores::MetadataStore;

/// Everything the writer needs to stage and promote one new document
/// version.
#[derive(Debug)]
pub struct RechunkPlan {
    /// Ordered membership of the new version.
    pub members: Vec<VersionMember>,
    /// Chunks that did not exist before this version.
    pub new_chunks: Vec<Chunk>,
    /// Initial versions of the new chunks.
    pub new_chunk_versions: Vec<ChunkVersion>,
    /// Chunk ids whose index entry must be (re)written: exactly the new
    /// chunks. Reused chunks keep their entry and their embedding.
    pub changed_chunk_ids: Vec<String>,
    /// Live chunks of the previous version with no counterpart in the new
    /// one; their index entries get deleted after promotion.
    pub dropped_chunk_ids: Vec<String>,
}

/// Match drafts against the document's live chunks by content hash.
///
/// Matching is position-insensitive and consumes each live chunk at most
/// once, so duplicated content within one document still gets distinct
/// chunk identities.
pub fn plan_rechunk(
    document_id: &str,
    current: &[(Chunk, ChunkVersion)],
    drafts: &[ChunkDraft],
) -> RechunkPlan {
    let now = Utc::now().timestamp();

    // hash -> live chunks still available for reuse, in chunk order
    let mut available: HashMap<&str, Vec<&(Chunk, ChunkVersion)>> = HashMap::new();
    for pair in current.iter().rev() {
        available
            .entry(pair.1.content_hash.as_str())
            .or_default()
            .push(pair);
    }

    let mut plan = RechunkPlan {
        members: Vec::with_capacity(drafts.len()),
        new_chunks: Vec::new(),
        new_chunk_versions: Vec::new(),
        changed_chunk_ids: Vec::new(),
        dropped_chunk_ids: Vec::new(),
    };
    let mut reused_ids: Vec<&str> = Vec::new();

    for (index, draft) in drafts.iter().enumerate() {
        let reuse = available
            .get_mut(draft.content_hash.as_str())
            .and_then(|v| v.pop());

        match reuse {
            Some((chunk, version)) => {
                reused_ids.push(chunk.id.as_str());
                plan.members.push(VersionMember {
                    chunk_id: chunk.id.clone(),
                    chunk_index: index as i64,
                    chunk_version_id: version.id.clone(),
                    content_hash: version.content_hash.clone(),
                    element_index_start: draft.metadata.element_index_start,
                    element_index_end: draft.metadata.element_index_end,
                });
            }
            None => {
                let chunk_id = Uuid::new_v4().to_string();
                let chunk_version_id = Uuid::new_v4().to_string();
                plan.new_chunks.push(Chunk {
                    id: chunk_id.clone(),
                    document_id: document_id.to_string(),
                    chunk_index: index as i64,
                    chunk_type: draft.chunk_type,
                    current_version_id: chunk_version_id.clone(),
                    element_index_start: draft.metadata.element_index_start,
                    element_index_end: draft.metadata.element_index_end,
                    index_state: IndexState::Fresh,
                    superseded: true,
                });
                plan.new_chunk_versions.push(ChunkVersion {
                    id: chunk_version_id.clone(),
                    chunk_id: chunk_id.clone(),
                    version_number: 1,
                    text: draft.text.clone(),
                    content_hash: draft.content_hash.clone(),
                    metadata: draft.metadata.clone(),
                    author: None,
                    comment: None,
                    created_at: now,
                });
                plan.changed_chunk_ids.push(chunk_id.clone());
                plan.members.push(VersionMember {
                    chunk_id,
                    chunk_index: index as i64,
                    chunk_version_id,
                    content_hash: draft.content_hash.clone(),
                    element_index_start: draft.metadata.element_index_start,
                    element_index_end: draft.metadata.element_index_end,
                });
            }
        }
    }

    for (chunk, _) in current {
        if !reused_ids.contains(&chunk.id.as_str()) {
            plan.dropped_chunk_ids.push(chunk.id.clone());
        }
    }

    plan
}

/// Chunk ids whose content differs between two versions of a document.
///
/// Comparison is by member content hash, never by position, so a chunk
/// that moved without changing text is not reported. Chunks present in
/// only one of the two versions count as changed.
pub async fn diff_chunks(
    store: &dyn MetadataStore,
    old_version_id: &str,
    new_version_id: &str,
) -> Result<Vec<String>> {
    let old = store.version_members(old_version_id).await?;
    let new = store.version_members(new_version_id).await?;

    let old_hashes: HashMap<&str, &str> = old
        .iter()
        .map(|m| (m.chunk_id.as_str(), m.content_hash.as_str()))
        .collect();

    let mut changed = Vec::new();
    for member in &new {
        match old_hashes.get(member.chunk_id.as_str()) {
            Some(hash) if *hash == member.content_hash => {}
            _ => changed.push(member.chunk_id.clone()),
        }
    }
    for member in &old {
        if !new.iter().any(|m| m.chunk_id == member.chunk_id) {
            changed.push(member.chunk_id.clone());
        }
    }
    Ok(changed)
}

/// Allocate the next document version record. The version number is read
/// under the assumption that the caller holds the document's write lock,
/// so no two concurrent publishers can allocate the same number.
pub async fn next_document_version(
    store: &dyn MetadataStore,
    document_id: &str,
    archive_ref: &str,
    author: Option<String>,
    comment: Option<String>,
) -> Result<DocumentVersion> {
    let latest = store.latest_version_number(document_id).await?;
    Ok(DocumentVersion {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        version_number: latest + 1,
        archive_ref: archive_ref.to_string(),
        author,
        comment,
        created_at: Utc::now().timestamp(),
        archived: false,
    })
}

/// Build the successor version of a single chunk: same chunk identity, new
/// immutable content snapshot, version number `current + 1`. Structural
/// metadata carries over from the current version since a text edit does
/// not move the chunk. Caller holds the chunk lock.
pub async fn next_chunk_version(
    store: &dyn MetadataStore,
    chunk_id: &str,
    text: &str,
    author: Option<String>,
    comment: Option<String>,
) -> Result<ChunkVersion> {
    let chunk = store
        .get_chunk(chunk_id)
        .await?
        .ok_or_else(|| PipelineError::Conflict(format!("chunk {} does not exist", chunk_id)))?;
    let current = store
        .get_chunk_version(&chunk.current_version_id)
        .await?
        .ok_or_else(|| {
            PipelineError::Conflict(format!(
                "chunk {} has dangling version pointer {}",
                chunk_id, chunk.current_version_id
            ))
        })?;

    Ok(ChunkVersion {
        id: Uuid::new_v4().to_string(),
        chunk_id: chunk_id.to_string(),
        version_number: current.version_number + 1,
        text: text.to_string(),
        content_hash: crate::models::content_hash(text.as_bytes()),
        metadata: current.metadata,
        author,
        comment,
        created_at: Utc::now().timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};

    fn draft(text: &str) -> ChunkDraft {
        ChunkDraft::new(ChunkType::Text, text.to_string(), ChunkMetadata::default())
    }

    fn live(id: &str, index: i64, text: &str) -> (Chunk, ChunkVersion) {
        let cv_id = format!("{}-v1", id);
        (
            Chunk {
                id: id.to_string(),
                document_id: "doc".to_string(),
                chunk_index: index,
                chunk_type: ChunkType::Text,
                current_version_id: cv_id.clone(),
                element_index_start: None,
                element_index_end: None,
                index_state: IndexState::Fresh,
                superseded: false,
            },
            ChunkVersion {
                id: cv_id,
                chunk_id: id.to_string(),
                version_number: 1,
                text: text.to_string(),
                content_hash: crate::models::content_hash(text.as_bytes()),
                metadata: ChunkMetadata::default(),
                author: None,
                comment: None,
                created_at: 0,
            },
        )
    }

    #[test]
    fn test_unchanged_content_reuses_identity() {
        let current = vec![live("c1", 0, "alpha"), live("c2", 1, "beta")];
        let plan = plan_rechunk("doc", &current, &[draft("alpha"), draft("beta")]);

        assert!(plan.new_chunks.is_empty());
        assert!(plan.changed_chunk_ids.is_empty());
        assert!(plan.dropped_chunk_ids.is_empty());
        assert_eq!(plan.members[0].chunk_id, "c1");
        assert_eq!(plan.members[1].chunk_id, "c2");
    }

    #[test]
    fn test_moved_chunk_keeps_identity_with_new_index() {
        let current = vec![live("c1", 0, "alpha"), live("c2", 1, "beta")];
        let plan = plan_rechunk("doc", &current, &[draft("beta"), draft("alpha")]);

        assert!(plan.new_chunks.is_empty());
        assert_eq!(plan.members[0].chunk_id, "c2");
        assert_eq!(plan.members[0].chunk_index, 0);
        assert_eq!(plan.members[1].chunk_id, "c1");
        assert_eq!(plan.members[1].chunk_index, 1);
    }

    #[test]
    fn test_new_and_dropped_content() {
        let current = vec![live("c1", 0, "alpha"), live("c2", 1, "beta")];
        let plan = plan_rechunk("doc", &current, &[draft("alpha"), draft("gamma")]);

        assert_eq!(plan.new_chunks.len(), 1);
        assert_eq!(plan.changed_chunk_ids.len(), 1);
        assert_eq!(plan.dropped_chunk_ids, vec!["c2".to_string()]);
        // new chunks are staged as superseded until promotion
        assert!(plan.new_chunks[0].superseded);
        assert_eq!(plan.new_chunk_versions[0].version_number, 1);
    }

    #[test]
    fn test_duplicate_content_consumes_each_chunk_once() {
        let current = vec![live("c1", 0, "dup")];
        let plan = plan_rechunk("doc", &current, &[draft("dup"), draft("dup")]);

        // first occurrence reuses c1, second needs a fresh identity
        assert_eq!(plan.members[0].chunk_id, "c1");
        assert_eq!(plan.new_chunks.len(), 1);
        assert_ne!(plan.members[1].chunk_id, "c1");
        assert!(plan.dropped_chunk_ids.is_empty());
    }

    #[test]
    fn test_first_version_of_empty_document() {
        let plan = plan_rechunk("doc", &[], &[draft("only")]);
        assert_eq!(plan.members.len(), 1);
        assert_eq!(plan.new_chunks.len(), 1);
        assert!(plan.dropped_chunk_ids.is_empty());
    }

    #[tokio::test]
    async fn test_diff_chunks_by_content_hash_not_position() {
        use crate::stores::memory::InMemoryMetadataStore;

        let store = InMemoryMetadataStore::new();
        let member = |chunk_id: &str, index: i64, text: &str| VersionMember {
            chunk_id: chunk_id.to_string(),
            chunk_index: index,
            chunk_version_id: format!("{}-v", chunk_id),
            content_hash: crate::models::content_hash(text.as_bytes()),
            element_index_start: None,
            element_index_end: None,
        };
        let version = |id: &str| DocumentVersion {
            id: id.to_string(),
            document_id: "doc".to_string(),
            version_number: 1,
            archive_ref: "ref".to_string(),
            author: None,
            comment: None,
            created_at: 0,
            archived: false,
        };

        // v1: a, b, c. v2: b (moved, edited), a (moved, unchanged), d (new).
        store
            .stage_version(
                &version("v1"),
                &[],
                &[],
                &[member("a", 0, "alpha"), member("b", 1, "beta"), member("c", 2, "gamma")],
            )
            .await
            .unwrap();
        store
            .stage_version(
                &version("v2"),
                &[],
                &[],
                &[member("b", 0, "beta edited"), member("a", 1, "alpha"), member("d", 2, "delta")],
            )
            .await
            .unwrap();

        let mut changed = diff_chunks(&store, "v1", "v2").await.unwrap();
        changed.sort();
        assert_eq!(changed, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
    }
}
