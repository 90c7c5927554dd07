use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT,
            source_name TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            current_version_id TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create document_versions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            archive_ref TEXT NOT NULL,
            author TEXT,
            comment TEXT,
            created_at INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            UNIQUE(document_id, version_number),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create version_members table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS version_members (
            version_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_version_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            element_index_start INTEGER,
            element_index_end INTEGER,
            PRIMARY KEY (version_id, chunk_id),
            FOREIGN KEY (version_id) REFERENCES document_versions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            current_version_id TEXT NOT NULL,
            element_index_start INTEGER,
            element_index_end INTEGER,
            index_state TEXT NOT NULL DEFAULT 'fresh',
            superseded INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunk_versions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_versions (
            id TEXT PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            author TEXT,
            comment TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(chunk_id, version_number),
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create images table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            hash TEXT PRIMARY KEY,
            archive_ref TEXT NOT NULL,
            thumbnail_ref TEXT,
            ocr_text TEXT,
            embedding BLOB,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create image_associations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_associations (
            id TEXT PRIMARY KEY,
            image_hash TEXT NOT NULL,
            document_id TEXT NOT NULL,
            page_number INTEGER,
            coordinates TEXT,
            element_index INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (image_hash) REFERENCES images(hash),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create sync_state table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            source TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            scope TEXT NOT NULL,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source, resource_type, scope)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create index_vectors table (vector half of the search index)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_vectors (
            entry_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create FTS5 virtual table (lexical half of the search index)
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_fts USING fts5(
                entry_id UNINDEXED,
                document_id UNINDEXED,
                version_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_index_state ON chunks(index_state)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_document_id ON document_versions(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_versions_chunk_id ON chunk_versions(chunk_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assoc_document_id ON image_associations(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assoc_image_hash ON image_associations(image_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_source_name ON documents(source_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
