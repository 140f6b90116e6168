use async_trait::async_trait;
use tracing::debug;

use super::{BlobAddress, BlobBackend, BlobError, BlobStore, RecordCipher};

/// Encrypts on the way in, decrypts on the way out.
pub struct EncryptedBlobStore<B> {
    backend: B,
    cipher: RecordCipher,
}

impl<B: BlobBackend> EncryptedBlobStore<B> {
    pub fn new(backend: B, cipher: RecordCipher) -> Self {
        Self { backend, cipher }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: BlobBackend> BlobStore for EncryptedBlobStore<B> {
    async fn store(&self, plaintext: &[u8]) -> Result<BlobAddress, BlobError> {
        let ciphertext = self.cipher.encrypt(plaintext)?;
        let address = self.backend.put(ciphertext).await?;
        debug!("Stored {} plaintext bytes at {}", plaintext.len(), address);
        Ok(address)
    }

    async fn retrieve(&self, address: &BlobAddress) -> Result<Vec<u8>, BlobError> {
        let ciphertext = self.backend.get(address).await?;
        self.cipher.decrypt(&ciphertext)
    }
}
