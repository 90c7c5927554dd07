//! In-memory implementations of all three stores, for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity; lexical search is a
//! term-containment count. The search index can be told to fail upserts so
//! tests can exercise the stale-index repair path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Chunk, ChunkVersion, Document, DocumentStatus, DocumentVersion, ImageAssociation,
    ImageRecord, IndexState, SyncState, VersionMember,
};

use super::{IndexEntry, IndexFilter, MetadataStore, ObjectArchive, SearchHit, SearchIndex};

// ============ Object archive ============

/// In-memory content-addressed blob store.
#[derive(Default)]
pub struct InMemoryObjectArchive {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap().len()
    }
}

#[async_trait]
impl ObjectArchive for InMemoryObjectArchive {
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<String> {
        let mut objects = self.objects.write().unwrap();
        objects.entry(key.to_string()).or_insert_with(|| bytes.to_vec());
        Ok(key.to_string())
    }

    async fn get(&self, reference: &str) -> StoreResult<Vec<u8>> {
        let objects = self.objects.read().unwrap();
        objects
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("object {}", reference)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.objects.read().unwrap().contains_key(key))
    }
}

// ============ Search index ============

/// In-memory search index with optional upsert-failure injection.
#[derive(Default)]
pub struct InMemorySearchIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
    fail_upserts: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `bulk_upsert` fail with a transient error
    /// until turned off again.
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn get_entry(&self, id: &str) -> Option<IndexEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }
}

fn snippet_of(text: &str) -> String {
    text.chars().take(240).collect()
}

fn matches_filter(entry: &IndexEntry, filter: &IndexFilter) -> bool {
    match &filter.document_id {
        Some(doc) => &entry.document_id == doc,
        None => true,
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn bulk_upsert(&self, entries: &[IndexEntry]) -> StoreResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::transient("bulk_upsert", "injected failure"));
        }
        let mut stored = self.entries.write().unwrap();
        for entry in entries {
            stored.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query_lexical(
        &self,
        query: &str,
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|e| matches_filter(e, filter))
            .filter_map(|e| {
                let text_lower = e.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if matches > 0 {
                    Some(SearchHit {
                        id: e.id.clone(),
                        document_id: e.document_id.clone(),
                        version_id: e.version_id.clone(),
                        score: matches as f64,
                        snippet: snippet_of(&e.text),
                    })
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>> {
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|e| matches_filter(e, filter))
            .filter_map(|e| {
                let v = e.vector.as_ref()?;
                let sim = cosine_similarity(vector, v) as f64;
                Some(SearchHit {
                    id: e.id.clone(),
                    document_id: e.document_id.clone(),
                    version_id: e.version_id.clone(),
                    score: sim,
                    snippet: snippet_of(&e.text),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap();
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}

// ============ Metadata store ============

#[derive(Default)]
struct MetadataState {
    documents: HashMap<String, Document>,
    versions: HashMap<String, DocumentVersion>,
    members: HashMap<String, Vec<VersionMember>>,
    chunks: HashMap<String, Chunk>,
    chunk_versions: HashMap<String, ChunkVersion>,
    images: HashMap<String, ImageRecord>,
    associations: Vec<ImageAssociation>,
    sync_states: HashMap<(String, String, String), SyncState>,
}

/// In-memory relational store for tests.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    state: RwLock<MetadataState>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_document(&self, doc: &Document) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.state.read().unwrap().documents.get(id).cloned())
    }

    async fn find_document_by_source(&self, source_name: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .documents
            .values()
            .find(|d| d.source_name == source_name && !d.deleted)
            .cloned())
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let state = self.state.read().unwrap();
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| !d.deleted)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        doc.status = status;
        Ok(())
    }

    async fn update_document_content_hash(&self, id: &str, content_hash: &str) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        doc.content_hash = content_hash.to_string();
        Ok(())
    }

    async fn soft_delete_document(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        doc.deleted = true;
        Ok(())
    }

    async fn stage_version(
        &self,
        version: &DocumentVersion,
        new_chunks: &[Chunk],
        new_chunk_versions: &[ChunkVersion],
        members: &[VersionMember],
    ) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state.versions.insert(version.id.clone(), version.clone());
        for chunk in new_chunks {
            let mut staged = chunk.clone();
            staged.superseded = true;
            state.chunks.insert(staged.id.clone(), staged);
        }
        for cv in new_chunk_versions {
            state.chunk_versions.insert(cv.id.clone(), cv.clone());
        }
        state.members.insert(version.id.clone(), members.to_vec());
        Ok(())
    }

    async fn promote_version(&self, document_id: &str, version_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let members = state
            .members
            .get(version_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("version {}", version_id)))?;

        let member_ids: Vec<String> = members.iter().map(|m| m.chunk_id.clone()).collect();
        for chunk in state.chunks.values_mut() {
            if chunk.document_id == document_id && !member_ids.contains(&chunk.id) {
                chunk.superseded = true;
            }
        }
        for member in &members {
            if let Some(chunk) = state.chunks.get_mut(&member.chunk_id) {
                chunk.superseded = false;
                chunk.chunk_index = member.chunk_index;
                chunk.current_version_id = member.chunk_version_id.clone();
                chunk.element_index_start = member.element_index_start;
                chunk.element_index_end = member.element_index_end;
            }
        }

        let doc = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", document_id)))?;
        doc.current_version_id = Some(version_id.to_string());
        doc.status = DocumentStatus::Ready;
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn get_document_version(&self, id: &str) -> StoreResult<Option<DocumentVersion>> {
        Ok(self.state.read().unwrap().versions.get(id).cloned())
    }

    async fn latest_version_number(&self, document_id: &str) -> StoreResult<i64> {
        Ok(self
            .state
            .read()
            .unwrap()
            .versions
            .values()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0))
    }

    async fn list_document_versions(
        &self,
        document_id: &str,
        include_archived: bool,
    ) -> StoreResult<Vec<DocumentVersion>> {
        let state = self.state.read().unwrap();
        let mut versions: Vec<DocumentVersion> = state
            .versions
            .values()
            .filter(|v| v.document_id == document_id && (include_archived || !v.archived))
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn archive_versions_over(&self, document_id: &str, keep: i64) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let mut numbers: Vec<i64> = state
            .versions
            .values()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.version_number)
            .collect();
        numbers.sort_unstable_by(|a, b| b.cmp(a));
        let cutoff = numbers.get(keep as usize - 1).copied().unwrap_or(i64::MIN);
        for version in state.versions.values_mut() {
            if version.document_id == document_id && version.version_number < cutoff {
                version.archived = true;
            }
        }
        Ok(())
    }

    async fn version_members(&self, version_id: &str) -> StoreResult<Vec<VersionMember>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .members
            .get(version_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_chunk(&self, id: &str) -> StoreResult<Option<Chunk>> {
        Ok(self.state.read().unwrap().chunks.get(id).cloned())
    }

    async fn list_current_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.document_id == document_id && !c.superseded)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_chunk_version(&self, id: &str) -> StoreResult<Option<ChunkVersion>> {
        Ok(self.state.read().unwrap().chunk_versions.get(id).cloned())
    }

    async fn list_chunk_versions(&self, chunk_id: &str) -> StoreResult<Vec<ChunkVersion>> {
        let state = self.state.read().unwrap();
        let mut versions: Vec<ChunkVersion> = state
            .chunk_versions
            .values()
            .filter(|v| v.chunk_id == chunk_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn push_chunk_version(&self, version: &ChunkVersion) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.chunks.contains_key(&version.chunk_id) {
            return Err(StoreError::NotFound(format!("chunk {}", version.chunk_id)));
        }
        state
            .chunk_versions
            .insert(version.id.clone(), version.clone());
        let chunk = state.chunks.get_mut(&version.chunk_id).unwrap();
        chunk.current_version_id = version.id.clone();
        Ok(())
    }

    async fn set_index_state(&self, chunk_id: &str, state_value: IndexState) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let chunk = state
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::NotFound(format!("chunk {}", chunk_id)))?;
        chunk.index_state = state_value;
        Ok(())
    }

    async fn list_stale_chunks(&self) -> StoreResult<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.index_state == IndexState::Stale && !c.superseded)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chunks)
    }

    async fn get_image(&self, hash: &str) -> StoreResult<Option<ImageRecord>> {
        Ok(self.state.read().unwrap().images.get(hash).cloned())
    }

    async fn insert_image(&self, image: &ImageRecord) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state.images.insert(image.hash.clone(), image.clone());
        Ok(())
    }

    async fn insert_image_association(&self, assoc: &ImageAssociation) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state.associations.push(assoc.clone());
        Ok(())
    }

    async fn list_image_associations(
        &self,
        document_id: &str,
    ) -> StoreResult<Vec<ImageAssociation>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .associations
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn list_associations_for_image(
        &self,
        image_hash: &str,
    ) -> StoreResult<Vec<ImageAssociation>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .associations
            .iter()
            .filter(|a| a.image_hash == image_hash)
            .cloned()
            .collect())
    }

    async fn get_sync_state(
        &self,
        source: &str,
        resource_type: &str,
        scope: &str,
    ) -> StoreResult<Option<SyncState>> {
        let key = (
            source.to_string(),
            resource_type.to_string(),
            scope.to_string(),
        );
        Ok(self.state.read().unwrap().sync_states.get(&key).cloned())
    }

    async fn set_sync_state(&self, sync: &SyncState) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let key = (
            sync.source.clone(),
            sync.resource_type.clone(),
            sync.scope.clone(),
        );
        state.sync_states.insert(key, sync.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_put_is_idempotent() {
        let archive = InMemoryObjectArchive::new();
        archive.put("k1", b"bytes").await.unwrap();
        archive.put("k1", b"bytes").await.unwrap();
        assert_eq!(archive.object_count(), 1);
        assert_eq!(archive.get("k1").await.unwrap(), b"bytes");
        assert!(archive.exists("k1").await.unwrap());
        assert!(!archive.exists("k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_index_upsert_replaces_by_id() {
        let index = InMemorySearchIndex::new();
        let entry = |text: &str| IndexEntry {
            id: "c1".to_string(),
            document_id: "d1".to_string(),
            version_id: "v1".to_string(),
            text: text.to_string(),
            vector: None,
        };
        index.bulk_upsert(&[entry("old text")]).await.unwrap();
        index.bulk_upsert(&[entry("new text")]).await.unwrap();
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.get_entry("c1").unwrap().text, "new text");
    }

    #[tokio::test]
    async fn test_search_index_failure_injection() {
        let index = InMemorySearchIndex::new();
        index.set_fail_upserts(true);
        let err = index.bulk_upsert(&[]).await.unwrap_err();
        assert!(err.is_transient());
        index.set_fail_upserts(false);
        assert!(index.bulk_upsert(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_state_round_trip() {
        let store = InMemoryMetadataStore::new();
        assert!(store
            .get_sync_state("fs", "document", "/tmp/a.md")
            .await
            .unwrap()
            .is_none());
        store
            .set_sync_state(&SyncState {
                source: "fs".to_string(),
                resource_type: "document".to_string(),
                scope: "/tmp/a.md".to_string(),
                cursor: "123".to_string(),
                updated_at: 1,
            })
            .await
            .unwrap();
        let state = store
            .get_sync_state("fs", "document", "/tmp/a.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.cursor, "123");
    }
}
