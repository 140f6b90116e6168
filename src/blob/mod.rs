//! Encrypted Blob Store
//!
//! Plaintext is encrypted before it reaches a backend, so a backend only ever
//! holds ciphertext. Addresses are opaque handles assigned by the backend.

pub mod cipher;
pub mod encrypted;
pub mod fs;
pub mod memory;

pub use cipher::{RecordCipher, NONCE_LEN};
pub use encrypted::EncryptedBlobStore;
pub use fs::FsBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob {0} not found")]
    NotFound(String),

    #[error("Blob I/O error: {0}")]
    Io(String),

    #[error("Blob decryption failed: {0}")]
    Decrypt(String),

    #[error("Blob encryption failed: {0}")]
    Encrypt(String),

    #[error("Invalid blob address: {0}")]
    InvalidAddress(String),
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Opaque locator returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobAddress(String);

impl BlobAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw ciphertext persistence.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put(&self, ciphertext: Vec<u8>) -> Result<BlobAddress, BlobError>;

    async fn get(&self, address: &BlobAddress) -> Result<Vec<u8>, BlobError>;
}

/// Plaintext-facing store. `retrieve(store(x)) == x` for any byte string.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, plaintext: &[u8]) -> Result<BlobAddress, BlobError>;

    async fn retrieve(&self, address: &BlobAddress) -> Result<Vec<u8>, BlobError>;
}
