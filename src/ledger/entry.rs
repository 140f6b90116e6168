//! Ledger History Entry
//!
//! One committed version of a key. Each entry is sealed with a transaction id
//! that hashes its content together with the previous entry's id, so a key's
//! history forms a hash chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::{prefixed_sha256, sha256_hex};

/// `previous_tx_id` of the first version of every key.
pub const GENESIS_TX_ID: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub version: u64,
    /// Ledger-wide commit sequence; drives the commit clock.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` marks a tombstone.
    pub payload: Option<Vec<u8>>,
    pub previous_tx_id: String,
    pub tx_id: String,
}

impl HistoryEntry {
    /// Build an entry and compute its transaction id.
    pub fn seal(
        key: &str,
        version: u64,
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: Option<Vec<u8>>,
        previous_tx_id: &str,
    ) -> Self {
        let mut entry = Self {
            key: key.to_string(),
            version,
            sequence,
            timestamp,
            payload,
            previous_tx_id: previous_tx_id.to_string(),
            tx_id: String::new(),
        };
        entry.tx_id = entry.calculate_tx_id();
        entry
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Create canonical string representation for hashing
    pub fn canonical_string(&self) -> String {
        let payload = match &self.payload {
            Some(bytes) => sha256_hex(bytes),
            None => "tombstone".to_string(),
        };
        format!(
            "key:{}|version:{}|sequence:{}|timestamp:{}|payload:{}|previous_tx_id:{}",
            self.key,
            self.version,
            self.sequence,
            self.timestamp.timestamp_millis(),
            payload,
            self.previous_tx_id
        )
    }

    pub fn calculate_tx_id(&self) -> String {
        prefixed_sha256(&self.canonical_string())
    }

    pub fn verify_tx_id(&self) -> bool {
        self.tx_id == self.calculate_tx_id()
    }

    /// Parse the payload as JSON. Tombstones and malformed bytes are errors the
    /// caller decides how to treat.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        match &self.payload {
            Some(bytes) => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            None => Err("tombstone".to_string()),
        }
    }
}
