//! Element-index reconciler.
//!
//! Text chunks, tables, and images are split apart during processing: chunks
//! land in the metadata store and search index, images in the
//! content-addressed object layer. Each carries the monotonic
//! `element_index` assigned once at extraction time; this module merges them
//! back into the original interleaved document order.
//!
//! Legacy records that predate element indexing (index absent) never cause
//! the merge to fail: they inherit the effective index of the nearest
//! preceding indexed item in native storage order and are placed stably
//! after it.

use crate::models::{Chunk, ChunkVersion, ImageAssociation};

/// One entry of the reconstructed document, in original order.
#[derive(Debug, Clone)]
pub enum DocumentItem {
    Chunk {
        chunk: Chunk,
        version: ChunkVersion,
    },
    Image {
        association: ImageAssociation,
    },
}

impl DocumentItem {
    /// Ordering key: a text chunk sorts on the start of its element range,
    /// an image on its single element index. `None` for legacy items.
    fn element_index(&self) -> Option<i64> {
        match self {
            DocumentItem::Chunk { chunk, .. } => chunk.element_index_start,
            DocumentItem::Image { association } => association.element_index,
        }
    }
}

/// Merge chunks and image associations into original document order.
///
/// Inputs are in native storage order (chunks by `chunk_index`, images by
/// insertion order). Ties between equal indices (should not occur by
/// construction) keep insertion order; unindexed legacy items are appended
/// at the position consistent with their neighbors.
pub fn merge_document_order(
    chunks: Vec<(Chunk, ChunkVersion)>,
    images: Vec<ImageAssociation>,
) -> Vec<DocumentItem> {
    let mut items: Vec<DocumentItem> = Vec::with_capacity(chunks.len() + images.len());
    items.extend(
        chunks
            .into_iter()
            .map(|(chunk, version)| DocumentItem::Chunk { chunk, version }),
    );
    items.extend(
        images
            .into_iter()
            .map(|association| DocumentItem::Image { association }),
    );

    // Each item gets an effective index: its own, or the last one seen
    // walking native order (i64::MIN before any indexed item). A stable
    // sort on the effective index then preserves insertion order for ties
    // and keeps legacy items next to their indexed neighbors.
    let mut keyed: Vec<(i64, DocumentItem)> = Vec::with_capacity(items.len());
    let mut last_seen = i64::MIN;
    for item in items {
        let effective = match item.element_index() {
            Some(idx) => {
                last_seen = idx;
                idx
            }
            None => last_seen,
        };
        keyed.push((effective, item));
    }
    keyed.sort_by_key(|(effective, _)| *effective);
    keyed.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType, IndexState};

    fn chunk(id: &str, chunk_index: i64, range: Option<(i64, i64)>) -> (Chunk, ChunkVersion) {
        let chunk = Chunk {
            id: id.to_string(),
            document_id: "doc".to_string(),
            chunk_index,
            chunk_type: ChunkType::Text,
            current_version_id: format!("{}-v1", id),
            element_index_start: range.map(|(s, _)| s),
            element_index_end: range.map(|(_, e)| e),
            index_state: IndexState::Fresh,
            superseded: false,
        };
        let version = ChunkVersion {
            id: format!("{}-v1", id),
            chunk_id: id.to_string(),
            version_number: 1,
            text: format!("text of {}", id),
            content_hash: String::new(),
            metadata: ChunkMetadata::default(),
            author: None,
            comment: None,
            created_at: 0,
        };
        (chunk, version)
    }

    fn image(id: &str, element_index: Option<i64>) -> ImageAssociation {
        ImageAssociation {
            id: id.to_string(),
            image_hash: format!("hash-{}", id),
            document_id: "doc".to_string(),
            page_number: None,
            coordinates: None,
            element_index,
            created_at: 0,
        }
    }

    fn ids(items: &[DocumentItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| match i {
                DocumentItem::Chunk { chunk, .. } => chunk.id.clone(),
                DocumentItem::Image { association } => association.id.clone(),
            })
            .collect()
    }

    #[test]
    fn test_interleaved_order_restored() {
        // Chunks span [0,1] and [3,3]; image sits at element 2 between them.
        let chunks = vec![chunk("c1", 0, Some((0, 1))), chunk("c2", 1, Some((3, 3)))];
        let images = vec![image("img1", Some(2))];
        let merged = merge_document_order(chunks, images);
        assert_eq!(ids(&merged), vec!["c1", "img1", "c2"]);
    }

    #[test]
    fn test_scenario_text_table_text() {
        // Text [0,1], table at 2, text at 3 merge back as 0-1 -> 2 -> 3.
        let chunks = vec![
            chunk("text-a", 0, Some((0, 1))),
            chunk("table", 1, Some((2, 2))),
            chunk("text-b", 2, Some((3, 3))),
        ];
        let merged = merge_document_order(chunks, vec![]);
        assert_eq!(ids(&merged), vec!["text-a", "table", "text-b"]);
    }

    #[test]
    fn test_legacy_chunk_without_index_follows_neighbor() {
        let chunks = vec![
            chunk("c1", 0, Some((0, 0))),
            chunk("legacy", 1, None),
            chunk("c2", 2, Some((5, 5))),
        ];
        let merged = merge_document_order(chunks, vec![]);
        // Legacy item inherits its preceding neighbor's position.
        assert_eq!(ids(&merged), vec!["c1", "legacy", "c2"]);
    }

    #[test]
    fn test_all_legacy_keeps_native_order() {
        let chunks = vec![
            chunk("a", 0, None),
            chunk("b", 1, None),
            chunk("c", 2, None),
        ];
        let images = vec![image("img", None)];
        let merged = merge_document_order(chunks, images);
        assert_eq!(ids(&merged), vec!["a", "b", "c", "img"]);
    }

    #[test]
    fn test_legacy_image_between_indexed_chunks() {
        // Images are appended after chunks in native order; an unindexed
        // image inherits the last index walked, which is the final chunk's.
        let chunks = vec![chunk("c1", 0, Some((0, 0))), chunk("c2", 1, Some((2, 2)))];
        let images = vec![image("old-img", None)];
        let merged = merge_document_order(chunks, images);
        assert_eq!(ids(&merged), vec!["c1", "c2", "old-img"]);
    }

    #[test]
    fn test_tie_keeps_insertion_order() {
        let chunks = vec![chunk("first", 0, Some((1, 1))), chunk("second", 1, Some((1, 1)))];
        let merged = merge_document_order(chunks, vec![]);
        assert_eq!(ids(&merged), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_inputs() {
        let merged = merge_document_order(vec![], vec![]);
        assert!(merged.is_empty());
    }
}
