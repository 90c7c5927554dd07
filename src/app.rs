//! Wiring: build the store stack and pipeline services from configuration.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::images::{DisabledDerivatives, ImageStore};
use crate::ingest::Ingestor;
use crate::locks::LockRegistry;
use crate::migrate;
use crate::search::SearchEngine;
use crate::stores::fs::FsObjectArchive;
use crate::stores::sqlite::{SqliteMetadataStore, SqliteSearchIndex};
use crate::stores::{MetadataStore, ObjectArchive, SearchIndex};
use crate::writer::TriStoreWriter;

pub struct App {
    pub pool: SqlitePool,
    pub metadata: Arc<dyn MetadataStore>,
    pub archive: Arc<dyn ObjectArchive>,
    pub index: Arc<dyn SearchIndex>,
    pub writer: Arc<TriStoreWriter>,
    pub ingestor: Ingestor,
    pub search: SearchEngine,
    pub images: Arc<ImageStore>,
}

impl App {
    /// Connect to the database, run migrations, and assemble the pipeline.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool.clone()));
        let archive: Arc<dyn ObjectArchive> = Arc::new(FsObjectArchive::new(&config.archive.root));
        let index: Arc<dyn SearchIndex> = Arc::new(SqliteSearchIndex::new(pool.clone()));
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let locks = Arc::new(LockRegistry::new());

        let writer = Arc::new(TriStoreWriter::new(
            Arc::clone(&archive),
            Arc::clone(&index),
            Arc::clone(&metadata),
            Arc::clone(&embedder),
            locks,
            config.retention.keep_versions,
        ));
        let images = Arc::new(ImageStore::new(
            Arc::clone(&archive),
            Arc::clone(&metadata),
            Arc::clone(&index),
            Arc::clone(&embedder),
            Arc::new(DisabledDerivatives),
        ));
        let ingestor = Ingestor::new(Arc::clone(&writer), Arc::clone(&images), &config.chunking)?;
        let search = SearchEngine::new(
            Arc::clone(&index),
            Arc::clone(&metadata),
            embedder,
            config.retrieval.clone(),
        );

        Ok(Self {
            pool,
            metadata,
            archive,
            index,
            writer,
            ingestor,
            search,
            images,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
