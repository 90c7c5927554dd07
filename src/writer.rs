//! Tri-store writer: ordered, idempotent writes across the three stores.
//!
//! No transaction spans the object archive, the metadata store, and the
//! search index, so consistency comes from write ordering instead:
//!
//! 1. archive the version artifact (append-only; failure aborts cleanly)
//! 2. stage the version in the metadata store (invisible to readers)
//! 3. upsert changed chunks into the search index (retried; failure
//!    aborts the publish before the pointer ever moves)
//! 4. promote the version (single atomic pointer flip, the commit point)
//! 5. best-effort cleanup of dropped index entries
//!
//! A crash or failure between any two steps leaves either the old version
//! fully visible or the new one, never a mix. Single-chunk edits run the
//! other way round: the metadata write commits first, and an index failure
//! flags the chunk stale for [`TriStoreWriter::repair_stale_chunks`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::{decode_artifact, encode_artifact, ArchivedChunk};
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result, StoreResult};
use crate::ledger::{self, RechunkPlan};
use crate::locks::LockRegistry;
use crate::models::{content_hash, DocumentVersion, IndexState};
use crate::stores::{IndexEntry, MetadataStore, ObjectArchive, SearchIndex};

const INDEX_RETRIES: u32 = 3;

pub struct TriStoreWriter {
    archive: Arc<dyn ObjectArchive>,
    index: Arc<dyn SearchIndex>,
    metadata: Arc<dyn MetadataStore>,
    embedder: Arc<dyn Embedder>,
    locks: Arc<LockRegistry>,
    keep_versions: i64,
}

/// Outcome of publishing one document version.
#[derive(Debug)]
pub struct PublishOutcome {
    pub version_id: String,
    pub version_number: i64,
    pub chunks_total: usize,
    pub chunks_new: usize,
    pub chunks_dropped: usize,
    /// True when embedding failed and the changed chunks were indexed
    /// text-only and flagged stale for repair.
    pub index_degraded: bool,
}

impl TriStoreWriter {
    pub fn new(
        archive: Arc<dyn ObjectArchive>,
        index: Arc<dyn SearchIndex>,
        metadata: Arc<dyn MetadataStore>,
        embedder: Arc<dyn Embedder>,
        locks: Arc<LockRegistry>,
        keep_versions: i64,
    ) -> Self {
        Self {
            archive,
            index,
            metadata,
            embedder,
            locks,
            keep_versions,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn archive(&self) -> &Arc<dyn ObjectArchive> {
        &self.archive
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    // ============ Version publication ============

    /// Publish a planned re-chunk as a new document version.
    ///
    /// Caller supplies the full ordered records of the new version (for the
    /// artifact) and the plan from [`ledger::plan_rechunk`]. Holds the
    /// document write lock for the duration.
    pub async fn publish_version(
        &self,
        document_id: &str,
        records: Vec<ArchivedChunk>,
        plan: RechunkPlan,
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<PublishOutcome> {
        let _doc_guard = self.locks.write_document(document_id).await;

        // Step 1: archive the artifact. Nothing has been staged yet, so a
        // failure here aborts the publish with no cleanup needed.
        let artifact = encode_artifact(&records)?;
        let artifact_key = content_hash(&artifact);
        let archive_ref = self
            .archive
            .put(&artifact_key, &artifact)
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;

        let version = ledger::next_document_version(
            self.metadata.as_ref(),
            document_id,
            &archive_ref,
            author,
            comment,
        )
        .await?;

        // Step 2: stage everything. New chunks land superseded, readers
        // still see the previous version.
        self.metadata
            .stage_version(&version, &plan.new_chunks, &plan.new_chunk_versions, &plan.members)
            .await?;

        // Step 3: index only the chunks whose content actually changed.
        // Embedding trouble degrades to text-only entries flagged for
        // repair; an index failure aborts before the pointer moves, so the
        // staged version is never promoted with an incomplete index.
        let (entries, index_degraded) = self
            .build_entries(&version, &records, &plan.changed_chunk_ids)
            .await;
        self.upsert_with_retry(&entries)
            .await
            .map_err(PipelineError::Store)?;
        if index_degraded {
            self.mark_stale(&plan.changed_chunk_ids).await;
        }

        // Step 4: the commit point.
        self.metadata
            .promote_version(document_id, &version.id)
            .await?;

        self.metadata
            .archive_versions_over(document_id, self.keep_versions)
            .await?;

        // Step 5: dropped entries are already invisible to version-filtered
        // queries; removal is cleanup, not correctness.
        if !plan.dropped_chunk_ids.is_empty() {
            let index = Arc::clone(&self.index);
            let dropped = plan.dropped_chunk_ids.clone();
            tokio::spawn(async move {
                if let Err(e) = index.delete(&dropped).await {
                    debug!(error = %e, "deferred index cleanup failed");
                }
            });
        }

        info!(
            document_id,
            version = version.version_number,
            chunks = plan.members.len(),
            new = plan.new_chunks.len(),
            dropped = plan.dropped_chunk_ids.len(),
            "published document version"
        );

        Ok(PublishOutcome {
            version_id: version.id,
            version_number: version.version_number,
            chunks_total: plan.members.len(),
            chunks_new: plan.new_chunks.len(),
            chunks_dropped: plan.dropped_chunk_ids.len(),
            index_degraded,
        })
    }

    // ============ Single-chunk edit ============

    /// Edit one chunk in place: new chunk version, same chunk identity, no
    /// document version. The metadata write decides success; an index
    /// failure only degrades freshness.
    pub async fn edit_chunk(
        &self,
        chunk_id: &str,
        text: &str,
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<crate::models::ChunkVersion> {
        let _chunk_guard = self.locks.lock_chunk(chunk_id).await;
        let chunk = self
            .metadata
            .get_chunk(chunk_id)
            .await?
            .ok_or_else(|| PipelineError::Conflict(format!("chunk {} does not exist", chunk_id)))?;
        let _doc_guard = self.locks.read_document(&chunk.document_id).await;

        // Re-read under the document lock: a re-chunk may have superseded
        // this chunk while we waited for it.
        let chunk = self
            .metadata
            .get_chunk(chunk_id)
            .await?
            .ok_or_else(|| PipelineError::Conflict(format!("chunk {} does not exist", chunk_id)))?;
        if chunk.superseded {
            return Err(PipelineError::Conflict(format!(
                "chunk {} is not part of the current version",
                chunk_id
            )));
        }

        let version =
            ledger::next_chunk_version(self.metadata.as_ref(), chunk_id, text, author, comment)
                .await?;
        self.metadata.push_chunk_version(&version).await?;

        let entry = IndexEntry {
            id: chunk_id.to_string(),
            document_id: chunk.document_id.clone(),
            version_id: version.id.clone(),
            text: text.to_string(),
            vector: self.embed_one(text).await,
        };
        if let Err(e) = self.upsert_with_retry(std::slice::from_ref(&entry)).await {
            warn!(chunk_id, error = %e, "index upsert failed after edit, flagging stale");
            let ids = [chunk_id.to_string()];
            self.mark_stale(&ids).await;
        } else if chunk.index_state == IndexState::Stale {
            let _ = self
                .metadata
                .set_index_state(chunk_id, IndexState::Fresh)
                .await;
        }

        Ok(version)
    }

    // ============ Index repair ============

    /// Re-index every chunk flagged stale from the metadata store, the
    /// source of truth. Returns the number of chunks repaired.
    pub async fn repair_stale_chunks(&self) -> Result<usize> {
        let stale = self.metadata.list_stale_chunks().await?;
        let mut repaired = 0;

        for chunk in stale {
            let Some(version) = self.metadata.get_chunk_version(&chunk.current_version_id).await?
            else {
                warn!(chunk_id = %chunk.id, "stale chunk has dangling version pointer");
                continue;
            };
            let entry = IndexEntry {
                id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                version_id: version.id.clone(),
                text: version.text.clone(),
                vector: self.embed_one(&version.text).await,
            };
            match self.upsert_with_retry(std::slice::from_ref(&entry)).await {
                Ok(()) => {
                    self.metadata
                        .set_index_state(&chunk.id, IndexState::Fresh)
                        .await?;
                    repaired += 1;
                }
                Err(e) => {
                    warn!(chunk_id = %chunk.id, error = %e, "repair upsert failed, chunk stays stale");
                }
            }
        }

        if repaired > 0 {
            info!(repaired, "repaired stale index entries");
        }
        Ok(repaired)
    }

    /// Rebuild a document's index entries from its current version's
    /// archived artifact. Used when the index is suspected of drift beyond
    /// per-chunk staleness.
    pub async fn rebuild_document_index(&self, document_id: &str) -> Result<usize> {
        let _doc_guard = self.locks.write_document(document_id).await;

        let document = self
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Conflict(format!("document {} does not exist", document_id))
            })?;
        let version_id = document.current_version_id.ok_or_else(|| {
            PipelineError::Conflict(format!("document {} has no published version", document_id))
        })?;
        let version = self
            .metadata
            .get_document_version(&version_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Conflict(format!("dangling version pointer {}", version_id))
            })?;

        let artifact = self
            .archive
            .get(&version.archive_ref)
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;
        let records = decode_artifact(&artifact)?;

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embed_many(&texts).await;
        let entries: Vec<IndexEntry> = records
            .iter()
            .enumerate()
            .map(|(i, record)| IndexEntry {
                id: record.chunk_id.clone(),
                document_id: document_id.to_string(),
                version_id: record.chunk_version_id.clone(),
                text: record.text.clone(),
                vector: vectors.as_ref().map(|v| v[i].clone()),
            })
            .collect();

        self.upsert_with_retry(&entries).await.map_err(PipelineError::Store)?;
        for record in &records {
            self.metadata
                .set_index_state(&record.chunk_id, IndexState::Fresh)
                .await?;
        }

        info!(document_id, entries = entries.len(), "rebuilt document index");
        Ok(entries.len())
    }

    // ============ Helpers ============

    /// Build the index entries for the changed chunks. The second value is
    /// true when the embedder was enabled but failed, i.e. the entries are
    /// text-only and should be flagged stale.
    async fn build_entries(
        &self,
        version: &DocumentVersion,
        records: &[ArchivedChunk],
        changed_chunk_ids: &[String],
    ) -> (Vec<IndexEntry>, bool) {
        let changed: Vec<&ArchivedChunk> = records
            .iter()
            .filter(|r| changed_chunk_ids.contains(&r.chunk_id))
            .collect();

        let texts: Vec<String> = changed.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embed_many(&texts).await;
        let degraded = self.embedder.is_enabled() && !changed.is_empty() && vectors.is_none();

        let entries = changed
            .iter()
            .enumerate()
            .map(|(i, record)| IndexEntry {
                id: record.chunk_id.clone(),
                document_id: version.document_id.clone(),
                version_id: record.chunk_version_id.clone(),
                text: record.text.clone(),
                vector: vectors.as_ref().map(|v| v[i].clone()),
            })
            .collect();
        (entries, degraded)
    }

    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let texts = [text.to_string()];
        self.embed_many(&texts)
            .await
            .and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) })
    }

    async fn embed_many(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        if !self.embedder.is_enabled() || texts.is_empty() {
            return None;
        }
        match self.embedder.embed(texts).await {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                warn!(error = %e, "embedding failed, indexing without vectors");
                None
            }
        }
    }

    async fn upsert_with_retry(&self, entries: &[IndexEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut last_err = None;
        for attempt in 0..=INDEX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_millis(100 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            match self.index.bulk_upsert(entries).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "index upsert retry");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            crate::error::StoreError::transient("bulk_upsert", "retries exhausted")
        }))
    }

    async fn mark_stale(&self, chunk_ids: &[String]) {
        for id in chunk_ids {
            if let Err(e) = self.metadata.set_index_state(id, IndexState::Stale).await {
                warn!(chunk_id = %id, error = %e, "failed to flag chunk stale");
            }
        }
    }
}
