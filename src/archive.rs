//! Archived chunk artifact codec.
//!
//! Every published document version is written to the object archive as a
//! single append-only artifact: one gzip-compressed, line-delimited JSON
//! record per chunk, ordered by `chunk_index`. The artifact is the
//! reconciliation source of truth when the search index has to be rebuilt
//! from scratch, and it is what a version's `archive_ref` points at.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::{ChunkMetadata, ChunkType};

/// One line of the artifact: the full snapshot of a chunk at this version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub chunk_version_id: String,
    pub version_number: i64,
    pub chunk_type: ChunkType,
    pub text: String,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

/// Serialize chunk records (already ordered by `chunk_index`) into the
/// compressed artifact.
pub fn encode_artifact(records: &[ArchivedChunk]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| PipelineError::MalformedInput(format!("encode chunk record: {}", e)))?;
        encoder
            .write_all(line.as_bytes())
            .and_then(|_| encoder.write_all(b"\n"))
            .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))?;
    }
    encoder
        .finish()
        .map_err(|e| PipelineError::ArchiveUnavailable(e.to_string()))
}

/// Decode an artifact back into ordered chunk records.
pub fn decode_artifact(bytes: &[u8]) -> Result<Vec<ArchivedChunk>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| PipelineError::MalformedInput(format!("decompress artifact: {}", e)))?;

    let mut records = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ArchivedChunk = serde_json::from_str(line)
            .map_err(|e| PipelineError::MalformedInput(format!("decode chunk record: {}", e)))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: i64, text: &str) -> ArchivedChunk {
        ArchivedChunk {
            chunk_id: format!("chunk-{}", index),
            chunk_index: index,
            chunk_version_id: format!("cv-{}", index),
            version_number: 1,
            chunk_type: ChunkType::Text,
            text: text.to_string(),
            content_hash: crate::models::content_hash(text.as_bytes()),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_round_trip_preserves_order_and_content() {
        let records = vec![record(0, "alpha"), record(1, "beta"), record(2, "gamma")];
        let bytes = encode_artifact(&records).unwrap();
        let decoded = decode_artifact(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        for (a, b) in records.iter().zip(decoded.iter()) {
            assert_eq!(a.chunk_index, b.chunk_index);
            assert_eq!(a.text, b.text);
            assert_eq!(a.content_hash, b.content_hash);
        }
    }

    #[test]
    fn test_artifact_is_compressed() {
        let text = "repetition ".repeat(500);
        let records = vec![record(0, &text)];
        let bytes = encode_artifact(&records).unwrap();
        assert!(bytes.len() < text.len());
    }

    #[test]
    fn test_empty_artifact() {
        let bytes = encode_artifact(&[]).unwrap();
        let decoded = decode_artifact(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_garbage_input_is_error() {
        assert!(decode_artifact(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_text_with_newlines_survives_jsonl() {
        let records = vec![record(0, "line one\nline two\n\nline four")];
        let bytes = encode_artifact(&records).unwrap();
        let decoded = decode_artifact(&bytes).unwrap();
        assert_eq!(decoded[0].text, "line one\nline two\n\nline four");
    }
}
