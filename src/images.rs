//! Image storage with content-hash deduplication.
//!
//! Physical image bytes are stored once per distinct content hash, in the
//! object archive; derivatives (thumbnail, OCR text, OCR embedding) are
//! computed only on first sight of the bytes. Placement within a document
//! lives on a separate association record, created on every reference, so
//! the same image can appear at different positions in different documents.
//! An association whose image carries OCR text gets its own index entry,
//! reusing the once-computed embedding, so image content is reachable from
//! both retrieval channels.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::models::{content_hash, ImageAssociation, ImagePlacement, ImageRecord};
use crate::stores::{IndexEntry, MetadataStore, ObjectArchive, SearchIndex};

/// Derivative computation for newly stored images. Kept behind a trait so
/// deployments without an OCR engine or image decoder plug in a no-op.
#[async_trait]
pub trait ImageDerivatives: Send + Sync {
    async fn thumbnail(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn ocr(&self, bytes: &[u8]) -> Result<Option<String>>;
}

/// Produces no derivatives.
pub struct DisabledDerivatives;

#[async_trait]
impl ImageDerivatives for DisabledDerivatives {
    async fn thumbnail(&self, _bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn ocr(&self, _bytes: &[u8]) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug)]
pub struct PutOutcome {
    pub hash: String,
    /// False when the bytes were already known and derivatives were skipped.
    pub created: bool,
}

pub struct ImageStore {
    archive: Arc<dyn ObjectArchive>,
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn Embedder>,
    derivatives: Arc<dyn ImageDerivatives>,
}

impl ImageStore {
    pub fn new(
        archive: Arc<dyn ObjectArchive>,
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn Embedder>,
        derivatives: Arc<dyn ImageDerivatives>,
    ) -> Self {
        Self {
            archive,
            metadata,
            index,
            embedder,
            derivatives,
        }
    }

    /// Store image bytes, deduplicated on content hash. Derivative
    /// computation runs only for previously unseen bytes.
    pub async fn put(&self, bytes: &[u8]) -> Result<PutOutcome> {
        let hash = content_hash(bytes);

        if self.metadata.get_image(&hash).await?.is_some() {
            debug!(%hash, "image already stored, skipping derivatives");
            return Ok(PutOutcome {
                hash,
                created: false,
            });
        }

        let archive_ref = self
            .archive
            .put(&hash, bytes)
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;

        // Derivative failures degrade the record, never the upload.
        let thumbnail_ref = match self.derivatives.thumbnail(bytes).await {
            Ok(Some(thumb)) => {
                let thumb_key = content_hash(&thumb);
                match self.archive.put(&thumb_key, &thumb).await {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        warn!(%hash, error = %e, "failed to archive thumbnail");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%hash, error = %e, "thumbnail generation failed");
                None
            }
        };
        let ocr_text = match self.derivatives.ocr(bytes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%hash, error = %e, "ocr failed");
                None
            }
        };

        // The OCR embedding is computed here, once per distinct hash;
        // associations reuse it from the record.
        let embedding = match &ocr_text {
            Some(text) if self.embedder.is_enabled() => {
                let texts = [text.clone()];
                match self.embedder.embed(&texts).await {
                    Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(%hash, error = %e, "image embedding failed");
                        None
                    }
                }
            }
            _ => None,
        };

        self.metadata
            .insert_image(&ImageRecord {
                hash: hash.clone(),
                archive_ref,
                thumbnail_ref,
                ocr_text,
                embedding,
                created_at: Utc::now().timestamp(),
            })
            .await?;

        Ok(PutOutcome {
            hash,
            created: true,
        })
    }

    /// Record one placement of an image within a document. Always creates a
    /// new association, even when the image bytes were deduplicated.
    pub async fn associate(
        &self,
        image_hash: &str,
        document_id: &str,
        placement: ImagePlacement,
    ) -> Result<ImageAssociation> {
        let image = self
            .metadata
            .get_image(image_hash)
            .await?
            .ok_or_else(|| PipelineError::Conflict(format!("image {} not stored", image_hash)))?;

        let assoc = ImageAssociation {
            id: Uuid::new_v4().to_string(),
            image_hash: image_hash.to_string(),
            document_id: document_id.to_string(),
            page_number: placement.page_number,
            coordinates: placement.coordinates,
            element_index: placement.element_index,
            created_at: Utc::now().timestamp(),
        };
        self.metadata.insert_image_association(&assoc).await?;

        if let Some(ocr_text) = image.ocr_text {
            let entry = IndexEntry {
                id: assoc.id.clone(),
                document_id: document_id.to_string(),
                version_id: assoc.id.clone(),
                text: ocr_text,
                vector: image.embedding,
            };
            if let Err(e) = self.index.bulk_upsert(std::slice::from_ref(&entry)).await {
                warn!(association = %assoc.id, error = %e, "failed to index image text");
            }
        }

        Ok(assoc)
    }

    pub async fn get_bytes(&self, image_hash: &str) -> Result<Vec<u8>> {
        let image = self
            .metadata
            .get_image(image_hash)
            .await?
            .ok_or_else(|| PipelineError::Conflict(format!("image {} not stored", image_hash)))?;
        self.archive
            .get(&image.archive_ref)
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))
    }
}
