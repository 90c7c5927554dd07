//! Filesystem-backed object archive.
//!
//! Objects live under the configured archive root at
//! `objects/<first two hash chars>/<key>`, a flat content-addressed layout
//! that keeps any single directory from growing unbounded. Writes go to a
//! temp file first and are renamed into place, so a crashed write never
//! leaves a partial object under its final key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

use super::ObjectArchive;

pub struct FsObjectArchive {
    root: PathBuf,
}

impl FsObjectArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let prefix = if key.len() >= 2 { &key[..2] } else { "xx" };
        self.root.join("objects").join(prefix).join(key)
    }
}

fn io_error(op: &'static str, path: &Path, err: std::io::Error) -> StoreError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(format!("object {}", path.display())),
        std::io::ErrorKind::PermissionDenied => {
            StoreError::permanent(op, format!("{}: {}", path.display(), err))
        }
        _ => StoreError::transient(op, format!("{}: {}", path.display(), err)),
    }
}

#[async_trait]
impl ObjectArchive for FsObjectArchive {
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<String> {
        let path = self.object_path(key);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("archive_put", &path, e))?
        {
            return Ok(key.to_string());
        }

        let parent = path
            .parent()
            .ok_or_else(|| StoreError::permanent("archive_put", "archive root has no parent"))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("archive_put", parent, e))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error("archive_put", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("archive_put", &path, e))?;

        Ok(key.to_string())
    }

    async fn get(&self, reference: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(reference);
        tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("archive_get", &path, e))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("archive_exists", &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsObjectArchive::new(dir.path());
        let key = crate::models::content_hash(b"payload");
        let reference = archive.put(&key, b"payload").await.unwrap();
        assert_eq!(reference, key);
        assert_eq!(archive.get(&reference).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_put_existing_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsObjectArchive::new(dir.path());
        let key = crate::models::content_hash(b"first");
        archive.put(&key, b"first").await.unwrap();
        // Same key again must not rewrite the object.
        archive.put(&key, b"second").await.unwrap();
        assert_eq!(archive.get(&key).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsObjectArchive::new(dir.path());
        let err = archive.get("deadbeef").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!archive.exists("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn test_objects_sharded_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsObjectArchive::new(dir.path());
        let key = crate::models::content_hash(b"sharded");
        archive.put(&key, b"sharded").await.unwrap();
        let expected = dir.path().join("objects").join(&key[..2]).join(&key);
        assert!(expected.exists());
    }
}
