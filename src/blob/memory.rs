//! In-process ciphertext backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BlobAddress, BlobBackend, BlobError};

#[derive(Clone, Default)]
pub struct MemoryBackend {
    blobs: Arc<RwLock<HashMap<BlobAddress, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// Overwrite stored ciphertext in place. Used to simulate tampering.
    pub async fn replace_ciphertext(
        &self,
        address: &BlobAddress,
        ciphertext: Vec<u8>,
    ) -> Result<(), BlobError> {
        match self.blobs.write().await.get_mut(address) {
            Some(slot) => {
                *slot = ciphertext;
                Ok(())
            }
            None => Err(BlobError::NotFound(address.to_string())),
        }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn put(&self, ciphertext: Vec<u8>) -> Result<BlobAddress, BlobError> {
        let address = BlobAddress::new(Uuid::new_v4().to_string());
        self.blobs.write().await.insert(address.clone(), ciphertext);
        Ok(address)
    }

    async fn get(&self, address: &BlobAddress) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(address.to_string()))
    }
}
