//! History Verification
//!
//! Checks the hash chain, version contiguity and timestamp ordering of a key's
//! history as returned by the ledger.

use tracing::{debug, warn};

use super::entry::{HistoryEntry, GENESIS_TX_ID};

/// Verification result with detailed information
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub entry_count: usize,
    pub error_message: Option<String>,
    pub hash_chain_valid: bool,
    pub timestamps_monotonic: bool,
    pub tampered: Vec<u64>,
}

impl VerificationResult {
    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("History is valid ({} entries)", self.entry_count)
        } else {
            format!(
                "History is invalid ({} entries): {}",
                self.entry_count,
                self.error_message.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

/// Verify a complete key history, oldest first.
pub fn verify_history(entries: &[HistoryEntry]) -> VerificationResult {
    let mut hash_chain_valid = true;
    let mut timestamps_monotonic = true;
    let mut error_message = None;

    if let Some(first) = entries.first() {
        if first.version != 1 || first.previous_tx_id != GENESIS_TX_ID {
            hash_chain_valid = false;
            error_message = Some(format!(
                "History of {} does not start at genesis (version {})",
                first.key, first.version
            ));
        }
    }

    for pair in entries.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);

        if curr.version != prev.version + 1 {
            hash_chain_valid = false;
            error_message.get_or_insert_with(|| {
                format!("Version gap between {} and {}", prev.version, curr.version)
            });
        }

        if curr.previous_tx_id != prev.tx_id {
            hash_chain_valid = false;
            error_message.get_or_insert_with(|| {
                format!(
                    "Hash chain broken at version {}: expected {}, got {}",
                    curr.version, prev.tx_id, curr.previous_tx_id
                )
            });
        }

        if curr.timestamp < prev.timestamp || curr.sequence <= prev.sequence {
            timestamps_monotonic = false;
            error_message.get_or_insert_with(|| {
                format!(
                    "Non-monotonic commit at version {}: {} < {}",
                    curr.version, curr.timestamp, prev.timestamp
                )
            });
        }
    }

    let tampered = find_tampered_entries(entries);
    if let Some(version) = tampered.first() {
        error_message.get_or_insert_with(|| format!("Invalid transaction id at version {}", version));
    }

    let is_valid = hash_chain_valid && timestamps_monotonic && tampered.is_empty();
    if is_valid {
        debug!("History verification successful: {} entries", entries.len());
    } else {
        warn!(
            "History verification failed: {}",
            error_message.as_deref().unwrap_or("unknown")
        );
    }

    VerificationResult {
        is_valid,
        entry_count: entries.len(),
        error_message,
        hash_chain_valid,
        timestamps_monotonic,
        tampered,
    }
}

/// Versions whose stored transaction id no longer matches their content.
pub fn find_tampered_entries(entries: &[HistoryEntry]) -> Vec<u64> {
    entries
        .iter()
        .filter(|entry| !entry.verify_tx_id())
        .map(|entry| entry.version)
        .collect()
}
