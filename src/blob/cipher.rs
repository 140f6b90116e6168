//! AES-256-GCM record cipher.
//!
//! Wire format: nonce (12 bytes) || ciphertext (includes 16-byte GCM tag)

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use std::fmt;

use super::BlobError;

pub const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct RecordCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecordCipher(..)")
    }
}

impl RecordCipher {
    pub fn new(key: [u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from(key);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BlobError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| BlobError::Encrypt(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, BlobError> {
        if encrypted.len() < NONCE_LEN {
            return Err(BlobError::Decrypt(format!(
                "ciphertext too short ({} bytes)",
                encrypted.len()
            )));
        }
        let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| BlobError::Decrypt(e.to_string()))
    }
}
