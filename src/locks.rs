//! Per-entity async locks.
//!
//! Single-chunk edits serialize on a per-chunk mutex; whole-document
//! operations (re-chunk, rebuild) take the document write lock, while
//! chunk edits additionally hold the document read lock so an edit can
//! never interleave with a re-chunk of the same document. Lock entries
//! are created on first use and kept for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

#[derive(Default)]
pub struct LockRegistry {
    chunks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    documents: Mutex<HashMap<String, Arc<tokio::sync::RwLock<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_lock(&self, chunk_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut chunks = self.chunks.lock().unwrap();
        chunks
            .entry(chunk_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::RwLock<()>> {
        let mut documents = self.documents.lock().unwrap();
        documents
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::RwLock::new(())))
            .clone()
    }

    /// Exclusive access to one chunk.
    pub async fn lock_chunk(&self, chunk_id: &str) -> OwnedMutexGuard<()> {
        self.chunk_lock(chunk_id).lock_owned().await
    }

    /// Shared document access, held by chunk-level operations.
    pub async fn read_document(&self, document_id: &str) -> OwnedRwLockReadGuard<()> {
        self.document_lock(document_id).read_owned().await
    }

    /// Exclusive document access, held by version-creating operations.
    pub async fn write_document(&self, document_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.document_lock(document_id).write_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_chunk_lock_is_exclusive() {
        let registry = LockRegistry::new();
        let guard = registry.lock_chunk("c1").await;
        let second = tokio::time::timeout(Duration::from_millis(20), registry.lock_chunk("c1"));
        assert!(second.await.is_err(), "second lock should block");
        drop(guard);
        registry.lock_chunk("c1").await;
    }

    #[tokio::test]
    async fn test_different_chunks_do_not_contend() {
        let registry = LockRegistry::new();
        let _a = registry.lock_chunk("c1").await;
        let _b = registry.lock_chunk("c2").await;
    }

    #[tokio::test]
    async fn test_document_write_excludes_readers() {
        let registry = LockRegistry::new();
        let write = registry.write_document("d1").await;
        let read = tokio::time::timeout(Duration::from_millis(20), registry.read_document("d1"));
        assert!(read.await.is_err(), "read should block behind write");
        drop(write);

        let _r1 = registry.read_document("d1").await;
        let _r2 = registry.read_document("d1").await;
    }
}
