//! Filesystem ciphertext backend.
//!
//! Each blob lives in `<root>/<sha256(ciphertext)>`. Writes go to a temporary
//! file first and are renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{BlobAddress, BlobBackend, BlobError};
use crate::digest::sha256_hex;

#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a blob on disk. Rejects anything that is not a 64-char hex digest.
    pub fn path_for(&self, address: &BlobAddress) -> Result<PathBuf, BlobError> {
        let name = address.as_str();
        if name.len() != 64 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlobError::InvalidAddress(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn put(&self, ciphertext: Vec<u8>) -> Result<BlobAddress, BlobError> {
        let address = BlobAddress::new(sha256_hex(&ciphertext));
        let path = self.path_for(&address)?;

        let staging = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&staging, &ciphertext).await?;
        fs::rename(&staging, &path).await?;

        debug!("Wrote {} ciphertext bytes to {}", ciphertext.len(), path.display());
        Ok(address)
    }

    async fn get(&self, address: &BlobAddress) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(address)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobStore, EncryptedBlobStore, RecordCipher};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::open(dir.path().join("blobs")).await.unwrap();
        let store = EncryptedBlobStore::new(backend, RecordCipher::new([5u8; 32]));

        let address = store.store(b"discharge summary").await.unwrap();
        assert_eq!(address.as_str().len(), 64);
        assert_eq!(store.retrieve(&address).await.unwrap(), b"discharge summary");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        let result = backend.get(&BlobAddress::new("../../etc/passwd")).await;
        assert!(matches!(result, Err(BlobError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        let address = BlobAddress::new("a".repeat(64));
        assert!(matches!(backend.get(&address).await, Err(BlobError::NotFound(_))));
    }
}
