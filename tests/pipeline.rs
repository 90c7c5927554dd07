//! End-to-end pipeline tests over the in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use quire::config::{ChunkingConfig, RetrievalConfig};
use quire::embedding::Embedder;
use quire::error::{PipelineError, Result};
use quire::images::{ImageDerivatives, ImageStore};
use quire::ingest::{IngestOutcome, Ingestor};
use quire::locks::LockRegistry;
use quire::models::{DocumentVersion, ImagePlacement, IndexState, VersionMember};
use quire::search::{QueryOptions, SearchEngine, SearchMode};
use quire::stores::memory::{InMemoryMetadataStore, InMemoryObjectArchive, InMemorySearchIndex};
use quire::stores::{MetadataStore, SearchIndex};
use quire::writer::TriStoreWriter;

/// Deterministic embedder: vector derived from the text bytes, with call
/// accounting so tests can assert what was (not) re-embedded.
struct HashEmbedder {
    embedded: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            embedded: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-mock"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut recorded = self.embedded.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                recorded.push(text.clone());
                let hash = quire::models::content_hash(text.as_bytes());
                hash.as_bytes()
                    .iter()
                    .take(8)
                    .map(|b| *b as f32 / 255.0)
                    .collect()
            })
            .collect())
    }
}

/// OCR that always reads the same text, so image tests get a searchable
/// derivative without a real engine.
struct StubOcr;

#[async_trait]
impl ImageDerivatives for StubOcr {
    async fn thumbnail(&self, _bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn ocr(&self, _bytes: &[u8]) -> Result<Option<String>> {
        Ok(Some("whiteboard sketch of the failover topology".to_string()))
    }
}

struct Harness {
    metadata: Arc<InMemoryMetadataStore>,
    index: Arc<InMemorySearchIndex>,
    embedder: Arc<HashEmbedder>,
    writer: Arc<TriStoreWriter>,
    images: Arc<ImageStore>,
    ingestor: Ingestor,
    search: SearchEngine,
}

fn harness() -> Harness {
    harness_with_retention(20)
}

fn harness_with_retention(keep_versions: i64) -> Harness {
    let archive = Arc::new(InMemoryObjectArchive::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    let embedder = Arc::new(HashEmbedder::new());

    let writer = Arc::new(TriStoreWriter::new(
        archive.clone(),
        index.clone(),
        metadata.clone(),
        embedder.clone(),
        Arc::new(LockRegistry::new()),
        keep_versions,
    ));
    let images = Arc::new(ImageStore::new(
        archive,
        metadata.clone(),
        index.clone(),
        embedder.clone(),
        Arc::new(StubOcr),
    ));
    let ingestor = Ingestor::new(writer.clone(), images.clone(), &ChunkingConfig::default()).unwrap();
    let search = SearchEngine::new(
        index.clone(),
        metadata.clone(),
        embedder.clone(),
        RetrievalConfig::default(),
    );

    Harness {
        metadata,
        index,
        embedder,
        writer,
        images,
        ingestor,
        search,
    }
}

// Three chunks under any profile: the table is always standalone, so the
// paragraphs before and after it cannot merge across it.
const DOC_V1: &str = "# Release Notes\n\n\
The deployment pipeline now retries failed uploads automatically.\n\n\
| stage | owner |\n\
| build | alice |\n\n\
Rollback instructions moved to the operations handbook.\n";

const DOC_V2: &str = "# Release Notes\n\n\
The deployment pipeline now retries failed uploads automatically.\n\n\
| stage | owner |\n\
| build | alice |\n\n\
Rollback steps are now automated by the release controller.\n";

async fn publish(h: &Harness, text: &str) -> String {
    publish_as(h, "notes.md", text).await
}

async fn publish_as(h: &Harness, source: &str, text: &str) -> String {
    match h
        .ingestor
        .ingest_text(source, None, text, None, None)
        .await
        .unwrap()
    {
        IngestOutcome::Published { document_id, .. } => document_id,
        IngestOutcome::Unchanged { .. } => panic!("expected a published version"),
    }
}

#[tokio::test]
async fn test_ingest_publishes_and_is_searchable() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;

    let document = h.metadata.get_document(&document_id).await.unwrap().unwrap();
    assert_eq!(document.status.as_str(), "ready");
    assert!(document.current_version_id.is_some());
    assert_eq!(document.title.as_deref(), Some("Release Notes"));

    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| !c.superseded));

    let result = h
        .search
        .run_query("deployment pipeline", SearchMode::Hybrid, &QueryOptions::default())
        .await
        .unwrap();
    assert!(!result.degraded);
    assert!(!result.hits.is_empty());
    assert_eq!(result.hits[0].document_id, document_id);
}

#[tokio::test]
async fn test_reingest_identical_bytes_is_noop() {
    let h = harness();
    publish(&h, DOC_V1).await;
    let second = h
        .ingestor
        .ingest_text("notes.md", None, DOC_V1, None, None)
        .await
        .unwrap();
    assert!(matches!(second, IngestOutcome::Unchanged { .. }));

    let document = h
        .metadata
        .find_document_by_source("notes.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.metadata.latest_version_number(&document.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_partial_rechunk_keeps_identity_and_embeddings() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;

    let v1_chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let embedded_after_v1 = h.embedder.embedded_texts().len();
    assert_eq!(embedded_after_v1, 3);

    publish(&h, DOC_V2).await;

    let v2_chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    assert_eq!(v2_chunks.len(), 3);

    // First two chunks are byte-identical and keep their ids.
    assert_eq!(v2_chunks[0].id, v1_chunks[0].id);
    assert_eq!(v2_chunks[1].id, v1_chunks[1].id);
    assert_ne!(v2_chunks[2].id, v1_chunks[2].id);

    // Only the changed chunk was embedded for version 2.
    let embedded = h.embedder.embedded_texts();
    assert_eq!(embedded.len(), embedded_after_v1 + 1);
    assert!(embedded.last().unwrap().contains("release controller"));

    // The dropped chunk is superseded, not gone; its version history stays.
    let old = h.metadata.get_chunk(&v1_chunks[2].id).await.unwrap().unwrap();
    assert!(old.superseded);
    assert_eq!(
        h.metadata.latest_version_number(&document_id).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_stale_hits_filtered_after_rechunk() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;
    publish(&h, DOC_V2).await;

    // The v1-only sentence is index residue at best; it must not surface.
    let result = h
        .search
        .run_query("operations handbook", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.hits.is_empty());

    let result = h
        .search
        .run_query("release controller", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 1);
    assert_eq!(result.hits[0].document_id, document_id);
}

#[tokio::test]
async fn test_edit_chunk_bumps_chunk_version_only() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;
    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let target = &chunks[2];

    let version = h
        .writer
        .edit_chunk(
            &target.id,
            "Rollback is described in the incident runbook.",
            Some("pat".to_string()),
            Some("fix stale link".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(version.version_number, 2);

    // Document version history is untouched by a chunk edit.
    assert_eq!(
        h.metadata.latest_version_number(&document_id).await.unwrap(),
        1
    );
    let chunk = h.metadata.get_chunk(&target.id).await.unwrap().unwrap();
    assert_eq!(chunk.current_version_id, version.id);

    let history = h.metadata.list_chunk_versions(&target.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].author.as_deref(), Some("pat"));

    // Search reflects the edit and no longer matches the old text.
    let result = h
        .search
        .run_query("incident runbook", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 1);
    let result = h
        .search
        .run_query("operations handbook", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.hits.is_empty());
}

#[tokio::test]
async fn test_index_failure_flags_stale_and_repair_recovers() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;
    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let target = &chunks[0];

    h.index.set_fail_upserts(true);
    // The edit still succeeds: the metadata store is the source of truth.
    h.writer
        .edit_chunk(&target.id, "Uploads now retry with jitter.", None, None)
        .await
        .unwrap();

    let chunk = h.metadata.get_chunk(&target.id).await.unwrap().unwrap();
    assert_eq!(chunk.index_state, IndexState::Stale);

    // The lagging entry carries the old version tag, so it is filtered out
    // rather than served stale.
    let result = h
        .search
        .run_query("deployment pipeline", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.hits.is_empty());

    h.index.set_fail_upserts(false);
    let repaired = h.writer.repair_stale_chunks().await.unwrap();
    assert_eq!(repaired, 1);

    let chunk = h.metadata.get_chunk(&target.id).await.unwrap().unwrap();
    assert_eq!(chunk.index_state, IndexState::Fresh);
    let result = h
        .search
        .run_query("retry with jitter", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 1);
}

#[tokio::test]
async fn test_rebuild_restores_index_from_artifact() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;

    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    h.index.delete(&ids).await.unwrap();

    let result = h
        .search
        .run_query("deployment pipeline", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.hits.is_empty());

    let rebuilt = h.writer.rebuild_document_index(&document_id).await.unwrap();
    assert_eq!(rebuilt, 3);

    let result = h
        .search
        .run_query("deployment pipeline", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert!(!result.hits.is_empty());
}

#[tokio::test]
async fn test_soft_delete_hides_results() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;

    h.metadata.soft_delete_document(&document_id).await.unwrap();

    let result = h
        .search
        .run_query("deployment pipeline", SearchMode::Hybrid, &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.hits.is_empty());
    assert!(h.metadata.list_documents().await.unwrap().is_empty());

    // Version records survive the soft delete.
    let versions = h
        .metadata
        .list_document_versions(&document_id, true)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_retention_archives_old_versions() {
    let h = harness_with_retention(2);
    let texts = [
        DOC_V1.to_string(),
        DOC_V2.to_string(),
        DOC_V2.replace("release controller", "deploy daemon"),
    ];
    let mut document_id = String::new();
    for text in &texts {
        document_id = publish(&h, text).await;
    }

    let live = h
        .metadata
        .list_document_versions(&document_id, false)
        .await
        .unwrap();
    let all = h
        .metadata
        .list_document_versions(&document_id, true)
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(all.len(), 3);
    assert!(all[0].archived);
    assert_eq!(live[0].version_number, 2);
    assert_eq!(live[1].version_number, 3);
}

#[tokio::test]
async fn test_score_ties_break_on_chunk_version_recency() {
    let h = harness();

    // Two documents with byte-identical content, so their chunks tie on
    // every lexical score.
    const NOTE: &str = "Canary rollback gating is required for production deploys.\n";
    let doc_a = publish_as(&h, "a.md", NOTE).await;
    let doc_b = publish_as(&h, "b.md", NOTE).await;

    let chunk_a = h.metadata.list_current_chunks(&doc_a).await.unwrap()[0].clone();
    let chunk_b = h.metadata.list_current_chunks(&doc_b).await.unwrap()[0].clone();

    // Drive chunk-a to version 5 without changing its text.
    let text = h
        .metadata
        .get_chunk_version(&chunk_a.current_version_id)
        .await
        .unwrap()
        .unwrap()
        .text;
    for _ in 0..4 {
        h.writer.edit_chunk(&chunk_a.id, &text, None, None).await.unwrap();
    }

    // The higher chunk version wins the score tie.
    let result = h
        .search
        .run_query("canary rollback gating", SearchMode::Lexical, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 2);
    assert_eq!(result.hits[0].id, chunk_a.id);
    assert_eq!(result.hits[1].id, chunk_b.id);
}

#[tokio::test]
async fn test_identical_image_uploads_share_one_embedding() {
    let h = harness();
    let doc_a = publish_as(&h, "a.md", DOC_V1).await;
    let doc_b = publish_as(&h, "b.md", DOC_V1).await;
    let embeds_before = h.embedder.embedded_texts().len();

    let first = h.images.put(b"png bytes").await.unwrap();
    let second = h.images.put(b"png bytes").await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    // one OCR embedding for N uploads of the same bytes
    assert_eq!(h.embedder.embedded_texts().len(), embeds_before + 1);

    let assoc_a = h
        .images
        .associate(
            &first.hash,
            &doc_a,
            ImagePlacement {
                page_number: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let assoc_b = h
        .images
        .associate(
            &first.hash,
            &doc_b,
            ImagePlacement {
                page_number: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let placements = h
        .metadata
        .list_associations_for_image(&first.hash)
        .await
        .unwrap();
    assert_eq!(placements.len(), 2);
    assert_eq!(placements[0].page_number, Some(1));
    assert_eq!(placements[1].page_number, Some(7));
    // associating reuses the stored embedding, it never re-embeds
    assert_eq!(h.embedder.embedded_texts().len(), embeds_before + 1);

    // Both placements are reachable from the vector channel.
    let result = h
        .search
        .run_query(
            "whiteboard sketch of the failover topology",
            SearchMode::Semantic,
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    let top: Vec<&str> = result.hits.iter().take(2).map(|hit| hit.id.as_str()).collect();
    assert!(top.contains(&assoc_a.id.as_str()));
    assert!(top.contains(&assoc_b.id.as_str()));
}

#[tokio::test]
async fn test_edit_conflicts_when_chunk_superseded_during_wait() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;
    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let target = chunks[2].clone();

    // Hold the document write lock, as a re-chunk does, so the edit blocks
    // after passing its chunk lookup.
    let guard = h.writer.locks().write_document(&document_id).await;
    let writer = h.writer.clone();
    let target_id = target.id.clone();
    let edit = tokio::spawn(async move {
        writer
            .edit_chunk(&target_id, "Edited while a re-chunk was running.", None, None)
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Commit a version keeping only the first two chunks, superseding the
    // edit's target, then release the lock.
    let mut members = Vec::new();
    for (i, chunk) in chunks.iter().take(2).enumerate() {
        let version = h
            .metadata
            .get_chunk_version(&chunk.current_version_id)
            .await
            .unwrap()
            .unwrap();
        members.push(VersionMember {
            chunk_id: chunk.id.clone(),
            chunk_index: i as i64,
            chunk_version_id: version.id.clone(),
            content_hash: version.content_hash.clone(),
            element_index_start: chunk.element_index_start,
            element_index_end: chunk.element_index_end,
        });
    }
    let version = DocumentVersion {
        id: "v2".to_string(),
        document_id: document_id.clone(),
        version_number: 2,
        archive_ref: "ref-2".to_string(),
        author: None,
        comment: None,
        created_at: 2,
        archived: false,
    };
    h.metadata
        .stage_version(&version, &[], &[], &members)
        .await
        .unwrap();
    h.metadata
        .promote_version(&document_id, &version.id)
        .await
        .unwrap();
    drop(guard);

    let result = edit.await.unwrap();
    assert!(matches!(result, Err(PipelineError::Conflict(_))));
    // No chunk version was committed against the superseded chunk.
    let history = h.metadata.list_chunk_versions(&target.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_semantic_search_ranks_exact_content_first() {
    let h = harness();
    let document_id = publish(&h, DOC_V1).await;
    let chunks = h.metadata.list_current_chunks(&document_id).await.unwrap();
    let version = h
        .metadata
        .get_chunk_version(&chunks[2].current_version_id)
        .await
        .unwrap()
        .unwrap();

    // The hash embedder only matches identical text, so querying with the
    // chunk's exact text must rank that chunk first.
    let result = h
        .search
        .run_query(&version.text, SearchMode::Semantic, &QueryOptions::default())
        .await
        .unwrap();
    assert!(!result.degraded);
    assert_eq!(result.hits[0].id, chunks[2].id);
}
