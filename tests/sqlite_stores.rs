//! SQLite store tests against a real database file.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;
use uuid::Uuid;

use quire::migrate;
use quire::models::{
    Chunk, ChunkMetadata, ChunkType, ChunkVersion, Document, DocumentStatus, DocumentVersion,
    ImagePlacement, ImageRecord, IndexState, VersionMember,
};
use quire::stores::sqlite::{SqliteMetadataStore, SqliteSearchIndex};
use quire::stores::{IndexEntry, IndexFilter, MetadataStore, SearchIndex};

async fn test_pool(dir: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite:{}",
        dir.join("quire.db").display()
    ))
    .unwrap()
    .create_if_missing(true)
    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

fn document(source_name: &str) -> Document {
    Document {
        id: Uuid::new_v4().to_string(),
        title: Some("Title".to_string()),
        source_name: source_name.to_string(),
        content_hash: quire::models::content_hash(source_name.as_bytes()),
        status: DocumentStatus::Pending,
        current_version_id: None,
        deleted: false,
        created_at: 1,
        updated_at: 1,
    }
}

fn chunk(document_id: &str, index: i64, text: &str) -> (Chunk, ChunkVersion, VersionMember) {
    let chunk_id = Uuid::new_v4().to_string();
    let version_id = Uuid::new_v4().to_string();
    let hash = quire::models::content_hash(text.as_bytes());
    (
        Chunk {
            id: chunk_id.clone(),
            document_id: document_id.to_string(),
            chunk_index: index,
            chunk_type: ChunkType::Text,
            current_version_id: version_id.clone(),
            element_index_start: Some(index),
            element_index_end: Some(index),
            index_state: IndexState::Fresh,
            superseded: true,
        },
        ChunkVersion {
            id: version_id.clone(),
            chunk_id: chunk_id.clone(),
            version_number: 1,
            text: text.to_string(),
            content_hash: hash.clone(),
            metadata: ChunkMetadata::default(),
            author: None,
            comment: None,
            created_at: 1,
        },
        VersionMember {
            chunk_id,
            chunk_index: index,
            chunk_version_id: version_id,
            content_hash: hash,
            element_index_start: Some(index),
            element_index_end: Some(index),
        },
    )
}

fn version(document_id: &str, number: i64) -> DocumentVersion {
    DocumentVersion {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        version_number: number,
        archive_ref: format!("ref-{}", number),
        author: None,
        comment: None,
        created_at: number,
        archived: false,
    }
}

#[tokio::test]
async fn test_stage_and_promote_flips_pointers_atomically() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(dir.path()).await;
    let store = SqliteMetadataStore::new(pool.clone());

    let doc = document("a.md");
    store.insert_document(&doc).await.unwrap();

    let (c1, v1, m1) = chunk(&doc.id, 0, "alpha");
    let (c2, v2, m2) = chunk(&doc.id, 1, "beta");
    let version = version(&doc.id, 1);
    store
        .stage_version(&version, &[c1.clone(), c2.clone()], &[v1, v2], &[m1, m2])
        .await
        .unwrap();

    // Staged chunks are invisible to current-chunk readers.
    assert!(store.list_current_chunks(&doc.id).await.unwrap().is_empty());
    let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
    assert!(loaded.current_version_id.is_none());

    store.promote_version(&doc.id, &version.id).await.unwrap();

    let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_version_id.as_deref(), Some(version.id.as_str()));
    assert_eq!(loaded.status, DocumentStatus::Ready);

    let current = store.list_current_chunks(&doc.id).await.unwrap();
    assert_eq!(current.len(), 2);
    assert_eq!(current[0].id, c1.id);
    assert_eq!(current[1].id, c2.id);

    pool.close().await;
}

#[tokio::test]
async fn test_promote_second_version_supersedes_dropped_chunks() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(dir.path()).await;
    let store = SqliteMetadataStore::new(pool.clone());

    let doc = document("b.md");
    store.insert_document(&doc).await.unwrap();

    let (c1, v1, m1) = chunk(&doc.id, 0, "keep");
    let (c2, v2, m2) = chunk(&doc.id, 1, "drop");
    let first = version(&doc.id, 1);
    store
        .stage_version(&first, &[c1.clone(), c2.clone()], &[v1, v2], &[m1.clone(), m2])
        .await
        .unwrap();
    store.promote_version(&doc.id, &first.id).await.unwrap();

    // Second version keeps c1 (moved to index 1) and adds a new chunk.
    let (c3, v3, m3) = chunk(&doc.id, 0, "fresh");
    let second = version(&doc.id, 2);
    let moved = VersionMember {
        chunk_index: 1,
        ..m1
    };
    store
        .stage_version(&second, &[c3.clone()], &[v3], &[m3, moved])
        .await
        .unwrap();
    store.promote_version(&doc.id, &second.id).await.unwrap();

    let current = store.list_current_chunks(&doc.id).await.unwrap();
    assert_eq!(current.len(), 2);
    assert_eq!(current[0].id, c3.id);
    assert_eq!(current[1].id, c1.id);
    assert_eq!(current[1].chunk_index, 1);

    let dropped = store.get_chunk(&c2.id).await.unwrap().unwrap();
    assert!(dropped.superseded);

    assert_eq!(store.latest_version_number(&doc.id).await.unwrap(), 2);
    pool.close().await;
}

#[tokio::test]
async fn test_push_chunk_version_advances_pointer() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(dir.path()).await;
    let store = SqliteMetadataStore::new(pool.clone());

    let doc = document("c.md");
    store.insert_document(&doc).await.unwrap();
    let (c1, v1, m1) = chunk(&doc.id, 0, "original");
    let first = version(&doc.id, 1);
    store
        .stage_version(&first, &[c1.clone()], &[v1.clone()], &[m1])
        .await
        .unwrap();
    store.promote_version(&doc.id, &first.id).await.unwrap();

    let next = ChunkVersion {
        id: Uuid::new_v4().to_string(),
        version_number: 2,
        text: "edited".to_string(),
        content_hash: quire::models::content_hash(b"edited"),
        author: Some("pat".to_string()),
        ..v1
    };
    store.push_chunk_version(&next).await.unwrap();

    let loaded = store.get_chunk(&c1.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_version_id, next.id);
    let history = store.list_chunk_versions(&c1.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "edited");

    store
        .set_index_state(&c1.id, IndexState::Stale)
        .await
        .unwrap();
    let stale = store.list_stale_chunks().await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, c1.id);

    pool.close().await;
}

#[tokio::test]
async fn test_fts_search_and_vector_round_trip() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(dir.path()).await;
    let index = SqliteSearchIndex::new(pool.clone());

    let entry = |id: &str, doc: &str, text: &str, vector: Option<Vec<f32>>| IndexEntry {
        id: id.to_string(),
        document_id: doc.to_string(),
        version_id: format!("{}-v", id),
        text: text.to_string(),
        vector,
    };
    index
        .bulk_upsert(&[
            entry("e1", "d1", "rollback procedure for failed deployments", Some(vec![1.0, 0.0])),
            entry("e2", "d1", "team onboarding checklist", Some(vec![0.0, 1.0])),
            entry("e3", "d2", "deployment pipeline overview", None),
        ])
        .await
        .unwrap();

    let hits = index
        .query_lexical("deployment", &IndexFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    let hits = index
        .query_lexical(
            "deployment",
            &IndexFilter {
                document_id: Some("d2".to_string()),
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "e3");

    let hits = index
        .query_vector(&[1.0, 0.0], &IndexFilter::default(), 10)
        .await
        .unwrap();
    // e3 has no vector and does not participate.
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "e1");

    // Upsert replaces by id; the old text must stop matching.
    index
        .bulk_upsert(&[entry("e1", "d1", "incident postmortem template", None)])
        .await
        .unwrap();
    let hits = index
        .query_lexical("rollback", &IndexFilter::default(), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
    let hits = index
        .query_vector(&[1.0, 0.0], &IndexFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1, "replaced entry's vector is gone");

    index.delete(&["e2".to_string()]).await.unwrap();
    let hits = index
        .query_lexical("onboarding", &IndexFilter::default(), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    pool.close().await;
}

#[tokio::test]
async fn test_images_and_sync_state_round_trip() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(dir.path()).await;
    let store = SqliteMetadataStore::new(pool.clone());

    let doc = document("d.md");
    store.insert_document(&doc).await.unwrap();

    let image = ImageRecord {
        hash: "abc123".to_string(),
        archive_ref: "abc123".to_string(),
        thumbnail_ref: None,
        ocr_text: Some("diagram".to_string()),
        embedding: Some(vec![0.5, -1.0]),
        created_at: 1,
    };
    store.insert_image(&image).await.unwrap();
    let loaded = store.get_image("abc123").await.unwrap().unwrap();
    assert_eq!(loaded.embedding, Some(vec![0.5, -1.0]));
    assert!(store.get_image("missing").await.unwrap().is_none());

    let placement = ImagePlacement {
        element_index: Some(4),
        ..Default::default()
    };
    let assoc = quire::models::ImageAssociation {
        id: Uuid::new_v4().to_string(),
        image_hash: image.hash.clone(),
        document_id: doc.id.clone(),
        page_number: placement.page_number,
        coordinates: placement.coordinates.clone(),
        element_index: placement.element_index,
        created_at: 2,
    };
    store.insert_image_association(&assoc).await.unwrap();

    let by_doc = store.list_image_associations(&doc.id).await.unwrap();
    assert_eq!(by_doc.len(), 1);
    assert_eq!(by_doc[0].element_index, Some(4));
    let by_image = store.list_associations_for_image(&image.hash).await.unwrap();
    assert_eq!(by_image.len(), 1);

    let state = quire::models::SyncState {
        source: "fs".to_string(),
        resource_type: "document".to_string(),
        scope: "/docs/a.md".to_string(),
        cursor: "1000".to_string(),
        updated_at: 1,
    };
    store.set_sync_state(&state).await.unwrap();
    store
        .set_sync_state(&quire::models::SyncState {
            cursor: "2000".to_string(),
            ..state.clone()
        })
        .await
        .unwrap();
    let loaded = store
        .get_sync_state("fs", "document", "/docs/a.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.cursor, "2000");

    pool.close().await;
}
