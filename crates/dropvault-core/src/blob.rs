//! Flat file-per-key blob storage under the data directory.
//!
//! The store knows nothing about tokens, encryption, or entry metadata; it
//! maps a storage key to bytes on disk and back.

use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Generate a fresh storage key. Keys are hex, safe as file names.
    pub fn fresh_key() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Write (or overwrite) the blob for `key`.
    pub async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), bytes).await
    }

    pub async fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path_for(key)).await
    }

    /// Remove the blob. Returns `false` if it did not exist.
    pub async fn delete(&self, key: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_read_overwrite_delete() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("files"));
        let key = BlobStore::fresh_key();

        store.write(&key, b"first").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), b"first");

        store.write(&key, b"second").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), b"second");

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.exists(&key).await);
        assert!(!store.delete(&key).await.unwrap());
    }

    #[test]
    fn fresh_keys_are_unique() {
        let a = BlobStore::fresh_key();
        let b = BlobStore::fresh_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
