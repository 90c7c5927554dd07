//! SQLite-backed metadata store and search index.
//!
//! Both halves share one pool. The metadata store owns the relational
//! tables created by [`crate::migrate`]; the search index owns the
//! `index_fts` FTS5 virtual table (lexical) and the `index_vectors` BLOB
//! table (vector). Vector scoring loads candidate BLOBs and computes
//! cosine similarity in Rust.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Chunk, ChunkMetadata, ChunkType, ChunkVersion, Document, DocumentStatus, DocumentVersion,
    ImageAssociation, ImageRecord, IndexState, SyncState, VersionMember,
};

use super::{IndexEntry, IndexFilter, MetadataStore, SearchHit, SearchIndex};

// ============ Row mapping ============

fn parse_status(op: &'static str, s: &str) -> StoreResult<DocumentStatus> {
    DocumentStatus::parse(s)
        .ok_or_else(|| StoreError::permanent(op, format!("unknown document status: {}", s)))
}

fn parse_chunk_type(op: &'static str, s: &str) -> StoreResult<ChunkType> {
    ChunkType::parse(s)
        .ok_or_else(|| StoreError::permanent(op, format!("unknown chunk type: {}", s)))
}

fn parse_index_state(op: &'static str, s: &str) -> StoreResult<IndexState> {
    IndexState::parse(s)
        .ok_or_else(|| StoreError::permanent(op, format!("unknown index state: {}", s)))
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        source_name: row.get("source_name"),
        content_hash: row.get("content_hash"),
        status: parse_status("get_document", &status)?,
        current_version_id: row.get("current_version_id"),
        deleted: row.get::<i64, _>("deleted") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> DocumentVersion {
    DocumentVersion {
        id: row.get("id"),
        document_id: row.get("document_id"),
        version_number: row.get("version_number"),
        archive_ref: row.get("archive_ref"),
        author: row.get("author"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
        archived: row.get::<i64, _>("archived") != 0,
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Chunk> {
    let chunk_type: String = row.get("chunk_type");
    let index_state: String = row.get("index_state");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        chunk_type: parse_chunk_type("get_chunk", &chunk_type)?,
        current_version_id: row.get("current_version_id"),
        element_index_start: row.get("element_index_start"),
        element_index_end: row.get("element_index_end"),
        index_state: parse_index_state("get_chunk", &index_state)?,
        superseded: row.get::<i64, _>("superseded") != 0,
    })
}

fn row_to_chunk_version(row: &sqlx::sqlite::SqliteRow) -> StoreResult<ChunkVersion> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json).map_err(|e| {
        StoreError::permanent("get_chunk_version", format!("bad metadata json: {}", e))
    })?;
    Ok(ChunkVersion {
        id: row.get("id"),
        chunk_id: row.get("chunk_id"),
        version_number: row.get("version_number"),
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        metadata,
        author: row.get("author"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
    })
}

fn row_to_member(row: &sqlx::sqlite::SqliteRow) -> VersionMember {
    VersionMember {
        chunk_id: row.get("chunk_id"),
        chunk_index: row.get("chunk_index"),
        chunk_version_id: row.get("chunk_version_id"),
        content_hash: row.get("content_hash"),
        element_index_start: row.get("element_index_start"),
        element_index_end: row.get("element_index_end"),
    }
}

fn row_to_image(row: &sqlx::sqlite::SqliteRow) -> ImageRecord {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    ImageRecord {
        hash: row.get("hash"),
        archive_ref: row.get("archive_ref"),
        thumbnail_ref: row.get("thumbnail_ref"),
        ocr_text: row.get("ocr_text"),
        embedding: embedding.map(|blob| crate::embedding::blob_to_vec(&blob)),
        created_at: row.get("created_at"),
    }
}

fn row_to_association(row: &sqlx::sqlite::SqliteRow) -> ImageAssociation {
    ImageAssociation {
        id: row.get("id"),
        image_hash: row.get("image_hash"),
        document_id: row.get("document_id"),
        page_number: row.get("page_number"),
        coordinates: row.get("coordinates"),
        element_index: row.get("element_index"),
        created_at: row.get("created_at"),
    }
}

// ============ Metadata store ============

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_chunk_version_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        cv: &ChunkVersion,
    ) -> StoreResult<()> {
        let metadata_json = serde_json::to_string(&cv.metadata).map_err(|e| {
            StoreError::permanent("insert_chunk_version", format!("encode metadata: {}", e))
        })?;
        sqlx::query(
            r#"
            INSERT INTO chunk_versions
                (id, chunk_id, version_number, text, content_hash, metadata_json,
                 author, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cv.id)
        .bind(&cv.chunk_id)
        .bind(cv.version_number)
        .bind(&cv.text)
        .bind(&cv.content_hash)
        .bind(&metadata_json)
        .bind(&cv.author)
        .bind(&cv.comment)
        .bind(cv.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_document(&self, doc: &Document) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, title, source_name, content_hash, status, current_version_id,
                 deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.source_name)
        .bind(&doc.content_hash)
        .bind(doc.status.as_str())
        .bind(&doc.current_version_id)
        .bind(doc.deleted as i64)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_document_by_source(&self, source_name: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE source_name = ? AND deleted = 0")
            .bind(source_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE deleted = 0 ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn update_document_content_hash(&self, id: &str, content_hash: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE documents SET content_hash = ?, updated_at = ? WHERE id = ?")
                .bind(content_hash)
                .bind(chrono::Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn soft_delete_document(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn stage_version(
        &self,
        version: &DocumentVersion,
        new_chunks: &[Chunk],
        new_chunk_versions: &[ChunkVersion],
        members: &[VersionMember],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO document_versions
                (id, document_id, version_number, archive_ref, author, comment,
                 created_at, archived)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.id)
        .bind(&version.document_id)
        .bind(version.version_number)
        .bind(&version.archive_ref)
        .bind(&version.author)
        .bind(&version.comment)
        .bind(version.created_at)
        .bind(version.archived as i64)
        .execute(&mut *tx)
        .await?;

        for chunk in new_chunks {
            // Staged as superseded; promote flips them live.
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, chunk_type, current_version_id,
                     element_index_start, element_index_end, index_state, superseded)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.current_version_id)
            .bind(chunk.element_index_start)
            .bind(chunk.element_index_end)
            .bind(chunk.index_state.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for cv in new_chunk_versions {
            Self::insert_chunk_version_tx(&mut tx, cv).await?;
        }

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO version_members
                    (version_id, chunk_id, chunk_index, chunk_version_id, content_hash,
                     element_index_start, element_index_end)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&version.id)
            .bind(&member.chunk_id)
            .bind(member.chunk_index)
            .bind(&member.chunk_version_id)
            .bind(&member.content_hash)
            .bind(member.element_index_start)
            .bind(member.element_index_end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn promote_version(&self, document_id: &str, version_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM document_versions WHERE id = ? AND document_id = ?",
        )
        .bind(version_id)
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            return Err(StoreError::NotFound(format!("version {}", version_id)));
        }

        // Everything goes stale first, then members come back live with
        // the position data recorded at staging time.
        sqlx::query("UPDATE chunks SET superseded = 1 WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE chunks SET
                superseded = 0,
                chunk_index = (SELECT m.chunk_index FROM version_members m
                               WHERE m.version_id = ? AND m.chunk_id = chunks.id),
                current_version_id = (SELECT m.chunk_version_id FROM version_members m
                                      WHERE m.version_id = ? AND m.chunk_id = chunks.id),
                element_index_start = (SELECT m.element_index_start FROM version_members m
                                       WHERE m.version_id = ? AND m.chunk_id = chunks.id),
                element_index_end = (SELECT m.element_index_end FROM version_members m
                                     WHERE m.version_id = ? AND m.chunk_id = chunks.id)
            WHERE id IN (SELECT chunk_id FROM version_members WHERE version_id = ?)
            "#,
        )
        .bind(version_id)
        .bind(version_id)
        .bind(version_id)
        .bind(version_id)
        .bind(version_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE documents SET current_version_id = ?, status = 'ready', updated_at = ? WHERE id = ?",
        )
        .bind(version_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_document_version(&self, id: &str) -> StoreResult<Option<DocumentVersion>> {
        let row = sqlx::query("SELECT * FROM document_versions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_version))
    }

    async fn latest_version_number(&self, document_id: &str) -> StoreResult<i64> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version_number) FROM document_versions WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0))
    }

    async fn list_document_versions(
        &self,
        document_id: &str,
        include_archived: bool,
    ) -> StoreResult<Vec<DocumentVersion>> {
        let rows = if include_archived {
            sqlx::query(
                "SELECT * FROM document_versions WHERE document_id = ? ORDER BY version_number",
            )
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT * FROM document_versions WHERE document_id = ? AND archived = 0 ORDER BY version_number",
            )
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows.iter().map(row_to_version).collect())
    }

    async fn archive_versions_over(&self, document_id: &str, keep: i64) -> StoreResult<()> {
        if keep <= 0 {
            return Ok(());
        }
        let cutoff: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT version_number FROM document_versions
            WHERE document_id = ?
            ORDER BY version_number DESC
            LIMIT 1 OFFSET ?
            "#,
        )
        .bind(document_id)
        .bind(keep - 1)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(cutoff) = cutoff {
            sqlx::query(
                "UPDATE document_versions SET archived = 1 WHERE document_id = ? AND version_number < ?",
            )
            .bind(document_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn version_members(&self, version_id: &str) -> StoreResult<Vec<VersionMember>> {
        let rows = sqlx::query(
            "SELECT * FROM version_members WHERE version_id = ? ORDER BY chunk_index",
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_member).collect())
    }

    async fn get_chunk(&self, id: &str) -> StoreResult<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn list_current_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = ? AND superseded = 0 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_chunk_version(&self, id: &str) -> StoreResult<Option<ChunkVersion>> {
        let row = sqlx::query("SELECT * FROM chunk_versions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk_version).transpose()
    }

    async fn list_chunk_versions(&self, chunk_id: &str) -> StoreResult<Vec<ChunkVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM chunk_versions WHERE chunk_id = ? ORDER BY version_number",
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk_version).collect()
    }

    async fn push_chunk_version(&self, version: &ChunkVersion) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_chunk_version_tx(&mut tx, version).await?;
        let result = sqlx::query("UPDATE chunks SET current_version_id = ? WHERE id = ?")
            .bind(&version.id)
            .bind(&version.chunk_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("chunk {}", version.chunk_id)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_index_state(&self, chunk_id: &str, state: IndexState) -> StoreResult<()> {
        let result = sqlx::query("UPDATE chunks SET index_state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("chunk {}", chunk_id)));
        }
        Ok(())
    }

    async fn list_stale_chunks(&self) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE index_state = 'stale' AND superseded = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_image(&self, hash: &str) -> StoreResult<Option<ImageRecord>> {
        let row = sqlx::query("SELECT * FROM images WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_image))
    }

    async fn insert_image(&self, image: &ImageRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO images (hash, archive_ref, thumbnail_ref, ocr_text, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.hash)
        .bind(&image.archive_ref)
        .bind(&image.thumbnail_ref)
        .bind(&image.ocr_text)
        .bind(image.embedding.as_deref().map(crate::embedding::vec_to_blob))
        .bind(image.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_image_association(&self, assoc: &ImageAssociation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO image_associations
                (id, image_hash, document_id, page_number, coordinates, element_index, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assoc.id)
        .bind(&assoc.image_hash)
        .bind(&assoc.document_id)
        .bind(assoc.page_number)
        .bind(&assoc.coordinates)
        .bind(assoc.element_index)
        .bind(assoc.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_image_associations(
        &self,
        document_id: &str,
    ) -> StoreResult<Vec<ImageAssociation>> {
        let rows = sqlx::query(
            "SELECT * FROM image_associations WHERE document_id = ? ORDER BY created_at, id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_association).collect())
    }

    async fn list_associations_for_image(
        &self,
        image_hash: &str,
    ) -> StoreResult<Vec<ImageAssociation>> {
        let rows = sqlx::query(
            "SELECT * FROM image_associations WHERE image_hash = ? ORDER BY created_at, id",
        )
        .bind(image_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_association).collect())
    }

    async fn get_sync_state(
        &self,
        source: &str,
        resource_type: &str,
        scope: &str,
    ) -> StoreResult<Option<SyncState>> {
        let row = sqlx::query(
            "SELECT * FROM sync_state WHERE source = ? AND resource_type = ? AND scope = ?",
        )
        .bind(source)
        .bind(resource_type)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| SyncState {
            source: row.get("source"),
            resource_type: row.get("resource_type"),
            scope: row.get("scope"),
            cursor: row.get("cursor"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn set_sync_state(&self, state: &SyncState) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source, resource_type, scope, cursor, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source, resource_type, scope)
            DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.source)
        .bind(&state.resource_type)
        .bind(&state.scope)
        .bind(&state.cursor)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============ Search index ============

pub struct SqliteSearchIndex {
    pool: SqlitePool,
}

impl SqliteSearchIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn bulk_upsert(&self, entries: &[IndexEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            // FTS5 has no upsert; delete-then-insert keyed on entry_id.
            sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
                .bind(&entry.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO index_fts (entry_id, document_id, version_id, text) VALUES (?, ?, ?, ?)",
            )
            .bind(&entry.id)
            .bind(&entry.document_id)
            .bind(&entry.version_id)
            .bind(&entry.text)
            .execute(&mut *tx)
            .await?;

            match &entry.vector {
                Some(vector) => {
                    sqlx::query(
                        r#"
                        INSERT INTO index_vectors (entry_id, document_id, version_id, vector)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(entry_id) DO UPDATE SET
                            document_id = excluded.document_id,
                            version_id = excluded.version_id,
                            vector = excluded.vector
                        "#,
                    )
                    .bind(&entry.id)
                    .bind(&entry.document_id)
                    .bind(&entry.version_id)
                    .bind(vec_to_blob(vector))
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM index_vectors WHERE entry_id = ?")
                        .bind(&entry.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_lexical(
        &self,
        query: &str,
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>> {
        let rows = match &filter.document_id {
            Some(document_id) => {
                sqlx::query(
                    r#"
                    SELECT entry_id, document_id, version_id, rank,
                           snippet(index_fts, 3, '>>>', '<<<', '...', 48) AS snippet
                    FROM index_fts
                    WHERE index_fts MATCH ? AND document_id = ?
                    ORDER BY rank
                    LIMIT ?
                    "#,
                )
                .bind(query)
                .bind(document_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT entry_id, document_id, version_id, rank,
                           snippet(index_fts, 3, '>>>', '<<<', '...', 48) AS snippet
                    FROM index_fts
                    WHERE index_fts MATCH ?
                    ORDER BY rank
                    LIMIT ?
                    "#,
                )
                .bind(query)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    id: row.get("entry_id"),
                    document_id: row.get("document_id"),
                    version_id: row.get("version_id"),
                    score: -rank, // negate so higher = better
                    snippet: row.get("snippet"),
                }
            })
            .collect())
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: i64,
    ) -> StoreResult<Vec<SearchHit>> {
        // Fetch candidate vectors and score in Rust.
        let rows = match &filter.document_id {
            Some(document_id) => {
                sqlx::query("SELECT * FROM index_vectors WHERE document_id = ?")
                    .bind(document_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM index_vectors")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let candidate = blob_to_vec(&blob);
                SearchHit {
                    id: row.get("entry_id"),
                    document_id: row.get("document_id"),
                    version_id: row.get("version_id"),
                    score: cosine_similarity(vector, &candidate) as f64,
                    snippet: String::new(),
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

    async fn delete(&self, ids: &[String]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM index_vectors WHERE entry_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
