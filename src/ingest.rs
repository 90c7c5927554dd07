//! Document ingestion: parse, chunk, plan, publish.
//!
//! Ingesting a source runs the full pipeline: raw bytes are archived
//! content-addressed, the text is parsed into elements and chunked under
//! the configured profile, the draft set is matched against the document's
//! live chunks so unchanged content keeps its identity and embedding, and
//! the result is published as a new document version through the tri-store
//! writer. Re-ingesting byte-identical content is a no-op.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::archive::ArchivedChunk;
use crate::chunker::{chunk_elements, ChunkProfile};
use crate::config::ChunkingConfig;
use crate::error::{PipelineError, Result};
use crate::images::ImageStore;
use crate::ledger::plan_rechunk;
use crate::models::{
    content_hash, ChunkDraft, Document, DocumentStatus, Element, ElementKind, ImagePlacement,
    SyncState,
};
use crate::parse::parse_text;
use crate::writer::{PublishOutcome, TriStoreWriter};

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text"];

pub struct Ingestor {
    writer: Arc<TriStoreWriter>,
    images: Arc<ImageStore>,
    profile: ChunkProfile,
    code_line_threshold: usize,
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// The source's bytes match the document's current content hash.
    Unchanged { document_id: String },
    Published {
        document_id: String,
        outcome: PublishOutcome,
    },
}

impl Ingestor {
    pub fn new(
        writer: Arc<TriStoreWriter>,
        images: Arc<ImageStore>,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        let profile = ChunkProfile::named(&chunking.profile).ok_or_else(|| {
            PipelineError::MalformedInput(format!("unknown chunking profile: {}", chunking.profile))
        })?;
        Ok(Self {
            writer,
            images,
            profile,
            code_line_threshold: chunking.code_line_threshold,
        })
    }

    // ============ Entry points ============

    /// Ingest text content under a logical source name.
    pub async fn ingest_text(
        &self,
        source_name: &str,
        title: Option<String>,
        text: &str,
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<IngestOutcome> {
        self.ingest_inner(source_name, title, text, None, author, comment)
            .await
    }

    /// Ingest one file from disk. Relative image references are resolved
    /// against the file's directory.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::MalformedInput(format!("{}: {}", path.display(), e)))?;
        let source_name = path.to_string_lossy().to_string();
        self.ingest_inner(&source_name, None, &text, path.parent(), None, None)
            .await
    }

    /// Walk a directory, ingesting text files whose modification time moved
    /// past the recorded cursor. Returns the number of files ingested.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<usize> {
        let mut ingested = 0;

        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_lowercase();
            if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
                continue;
            }

            let scope = path.to_string_lossy().to_string();
            let mtime = file_mtime(path);
            let cursor = self
                .writer
                .metadata()
                .get_sync_state("fs", "document", &scope)
                .await?
                .map(|s| s.cursor);
            if cursor.as_deref() == Some(mtime.as_str()) {
                debug!(path = %scope, "mtime cursor unchanged, skipping");
                continue;
            }

            match self.ingest_file(path).await {
                Ok(IngestOutcome::Published { .. }) => ingested += 1,
                Ok(IngestOutcome::Unchanged { .. }) => {}
                Err(e) => {
                    warn!(path = %scope, error = %e, "ingest failed");
                    continue;
                }
            }

            self.writer
                .metadata()
                .set_sync_state(&SyncState {
                    source: "fs".to_string(),
                    resource_type: "document".to_string(),
                    scope,
                    cursor: mtime,
                    updated_at: chrono::Utc::now().timestamp(),
                })
                .await?;
        }

        info!(dir = %dir.display(), ingested, "directory sync complete");
        Ok(ingested)
    }

    /// Re-run chunking over a document's archived source, e.g. after a
    /// profile change. Produces a new version even when chunk boundaries
    /// end up identical; unchanged chunks still keep identity.
    pub async fn rechunk(&self, document_id: &str, comment: Option<String>) -> Result<PublishOutcome> {
        let document = self
            .writer
            .metadata()
            .get_document(document_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Conflict(format!("document {} does not exist", document_id))
            })?;
        let raw = self
            .writer
            .archive()
            .get(&document.content_hash)
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;
        let text = String::from_utf8(raw)
            .map_err(|e| PipelineError::MalformedInput(format!("archived source: {}", e)))?;

        let elements = parse_text(&text)?;
        let drafts = chunk_elements(&elements, &self.profile, self.code_line_threshold)?;
        self.publish(&document, &drafts, None, comment).await
    }

    // ============ Pipeline ============

    async fn ingest_inner(
        &self,
        source_name: &str,
        title: Option<String>,
        text: &str,
        base_dir: Option<&Path>,
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<IngestOutcome> {
        let hash = content_hash(text.as_bytes());
        let metadata = self.writer.metadata();

        let document = match metadata.find_document_by_source(source_name).await? {
            Some(existing) => {
                if existing.content_hash == hash && existing.current_version_id.is_some() {
                    debug!(source_name, "content hash unchanged, skipping");
                    return Ok(IngestOutcome::Unchanged {
                        document_id: existing.id,
                    });
                }
                metadata
                    .update_document_content_hash(&existing.id, &hash)
                    .await?;
                Document {
                    content_hash: hash.clone(),
                    ..existing
                }
            }
            None => {
                let now = chrono::Utc::now().timestamp();
                let document = Document {
                    id: Uuid::new_v4().to_string(),
                    title: title.clone().or_else(|| derive_title(text)),
                    source_name: source_name.to_string(),
                    content_hash: hash.clone(),
                    status: DocumentStatus::Pending,
                    current_version_id: None,
                    deleted: false,
                    created_at: now,
                    updated_at: now,
                };
                metadata.insert_document(&document).await?;
                document
            }
        };

        // Raw upload is archived under its own hash before any processing,
        // so a failed ingest can always be retried from the archive.
        self.writer
            .archive()
            .put(&hash, text.as_bytes())
            .await
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;

        metadata
            .update_document_status(&document.id, DocumentStatus::Processing)
            .await?;

        let result = self
            .process(&document, text, base_dir, author, comment)
            .await;
        match result {
            Ok(outcome) => Ok(IngestOutcome::Published {
                document_id: document.id,
                outcome,
            }),
            Err(e) => {
                let _ = metadata
                    .update_document_status(&document.id, DocumentStatus::Failed)
                    .await;
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        document: &Document,
        text: &str,
        base_dir: Option<&Path>,
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<PublishOutcome> {
        let elements = parse_text(text)?;
        let drafts = chunk_elements(&elements, &self.profile, self.code_line_threshold)?;

        if let Some(base_dir) = base_dir {
            self.ingest_referenced_images(document, &elements, base_dir)
                .await;
        }

        self.publish(document, &drafts, author, comment).await
    }

    async fn publish(
        &self,
        document: &Document,
        drafts: &[ChunkDraft],
        author: Option<String>,
        comment: Option<String>,
    ) -> Result<PublishOutcome> {
        let metadata = self.writer.metadata();
        let current_chunks = metadata.list_current_chunks(&document.id).await?;
        let mut current = Vec::with_capacity(current_chunks.len());
        for chunk in current_chunks {
            let version = metadata
                .get_chunk_version(&chunk.current_version_id)
                .await?
                .ok_or_else(|| {
                    PipelineError::Conflict(format!(
                        "chunk {} has dangling version pointer",
                        chunk.id
                    ))
                })?;
            current.push((chunk, version));
        }

        let plan = plan_rechunk(&document.id, &current, drafts);

        // Full ordered records for the artifact: reused chunks keep their
        // existing version number, new ones start at 1.
        let records: Vec<ArchivedChunk> = plan
            .members
            .iter()
            .zip(drafts.iter())
            .map(|(member, draft)| {
                let version_number = current
                    .iter()
                    .find(|(_, v)| v.id == member.chunk_version_id)
                    .map(|(_, v)| v.version_number)
                    .unwrap_or(1);
                ArchivedChunk {
                    chunk_id: member.chunk_id.clone(),
                    chunk_index: member.chunk_index,
                    chunk_version_id: member.chunk_version_id.clone(),
                    version_number,
                    chunk_type: draft.chunk_type,
                    text: draft.text.clone(),
                    content_hash: draft.content_hash.clone(),
                    metadata: draft.metadata.clone(),
                }
            })
            .collect();

        self.writer
            .publish_version(&document.id, records, plan, author, comment)
            .await
    }

    /// Best-effort: store and associate images referenced by the document.
    /// A missing or unreadable image never fails the ingest.
    async fn ingest_referenced_images(
        &self,
        document: &Document,
        elements: &[Element],
        base_dir: &Path,
    ) {
        for element in elements {
            let ElementKind::ImageRef { src } = &element.kind else {
                continue;
            };
            if src.starts_with("http://") || src.starts_with("https://") {
                continue;
            }
            let path = base_dir.join(src);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "referenced image not readable");
                    continue;
                }
            };
            let outcome = match self.images.put(&bytes).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "image store failed");
                    continue;
                }
            };
            let placement = ImagePlacement {
                element_index: Some(element.element_index),
                ..Default::default()
            };
            if let Err(e) = self
                .images
                .associate(&outcome.hash, &document.id, placement)
                .await
            {
                warn!(path = %path.display(), error = %e, "image association failed");
            }
        }
    }
}

fn derive_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
}

fn file_mtime(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title_from_first_heading() {
        assert_eq!(
            derive_title("intro text\n\n## Setup Guide\nbody"),
            Some("Setup Guide".to_string())
        );
        assert_eq!(derive_title("no headings here"), None);
        assert_eq!(derive_title("#\nempty heading"), None);
    }
}
