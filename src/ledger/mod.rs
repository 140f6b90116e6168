//! Versioned Ledger
//!
//! Append-only, per-key history with snapshot reads and field-equality queries.
//! Every write produces a sealed `HistoryEntry`; the latest live entry of a key
//! is its snapshot. Commit timestamps come from `CommitClock`, never wall-clock.

pub mod clock;
pub mod cursor;
pub mod entry;
pub mod memory;
pub mod query;
pub mod sqlite;
pub mod verify;

pub use clock::CommitClock;
pub use cursor::HistoryCursor;
pub use entry::{HistoryEntry, GENESIS_TX_ID};
pub use memory::MemoryLedger;
pub use query::FieldPredicate;
pub use sqlite::SqliteLedger;
pub use verify::{find_tampered_entries, verify_history, VerificationResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Key {0} not found")]
    NotFound(String),

    #[error("Key {0} already holds a live value")]
    AlreadyExists(String),

    #[error("Version conflict on {key}: expected {expected}, found {found:?}")]
    VersionConflict {
        key: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("Corrupt value for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

/// Optimistic precondition attached to a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Commit unconditionally.
    Any,
    /// The key must have no live value.
    Absent,
    /// The key must never have been written, tombstones included.
    Unused,
    /// The key's head must be this live version.
    Version(u64),
}

/// Head of a key's history as seen by a commit: version and liveness.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Head {
    pub version: u64,
    pub live: bool,
}

impl WriteGuard {
    pub(crate) fn check(&self, key: &str, head: Option<Head>) -> Result<(), LedgerError> {
        match (self, head) {
            (WriteGuard::Any, _) => Ok(()),
            (WriteGuard::Absent, Some(h)) if h.live => {
                Err(LedgerError::AlreadyExists(key.to_string()))
            }
            (WriteGuard::Absent, _) => Ok(()),
            (WriteGuard::Unused, Some(_)) => Err(LedgerError::AlreadyExists(key.to_string())),
            (WriteGuard::Unused, None) => Ok(()),
            (WriteGuard::Version(expected), Some(h)) if h.live && h.version == *expected => Ok(()),
            (WriteGuard::Version(expected), h) => Err(LedgerError::VersionConflict {
                key: key.to_string(),
                expected: *expected,
                found: h.map(|h| h.version),
            }),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub key: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_id: String,
}

impl From<&HistoryEntry> for CommitReceipt {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            key: entry.key.clone(),
            version: entry.version,
            timestamp: entry.timestamp,
            tx_id: entry.tx_id.clone(),
        }
    }
}

/// Latest live value of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub key: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_id: String,
    pub payload: Vec<u8>,
}

impl Snapshot {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, LedgerError> {
        serde_json::from_slice(&self.payload).map_err(|e| LedgerError::Corrupt {
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }
}

/// Ledger substrate. Implementations serialize commits per key and enforce the
/// commit's `WriteGuard` atomically with the append.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a version (or a tombstone when `payload` is `None`).
    async fn commit(
        &self,
        key: &str,
        guard: WriteGuard,
        payload: Option<Vec<u8>>,
    ) -> Result<CommitReceipt, LedgerError>;

    async fn get(&self, key: &str) -> Result<Option<Snapshot>, LedgerError>;

    /// Latest version number of a key, tombstones included.
    async fn head_version(&self, key: &str) -> Result<Option<u64>, LedgerError>;

    /// Entries with version greater than `after_version`, ascending, at most `limit`.
    async fn history_page(
        &self,
        key: &str,
        after_version: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError>;

    /// Live snapshots whose JSON payload satisfies `predicate`, in no particular order.
    async fn query(&self, predicate: &FieldPredicate) -> Result<Vec<Snapshot>, LedgerError>;

    /// Clock reading the next commit will carry.
    async fn now(&self) -> Result<DateTime<Utc>, LedgerError>;

    async fn put(&self, key: &str, payload: Vec<u8>) -> Result<CommitReceipt, LedgerError> {
        self.commit(key, WriteGuard::Any, Some(payload)).await
    }

    async fn delete(&self, key: &str) -> Result<CommitReceipt, LedgerError> {
        self.commit(key, WriteGuard::Any, None).await
    }

    fn history_page_size(&self) -> usize {
        DEFAULT_HISTORY_PAGE_SIZE
    }
}

impl<'a> dyn Ledger + 'a {
    /// Lazy, restartable cursor over a key's history, oldest first.
    pub fn history(&self, key: &str) -> HistoryCursor<'_> {
        HistoryCursor::new(self, key, self.history_page_size())
    }

    /// Read and decode the current snapshot of `key`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(Snapshot, T)>, LedgerError> {
        match self.get(key).await? {
            Some(snapshot) => {
                let value = snapshot.json()?;
                Ok(Some((snapshot, value)))
            }
            None => Ok(None),
        }
    }

    /// Serialize `value` and commit it under `guard`.
    pub async fn commit_json<T: Serialize + Sync>(
        &self,
        key: &str,
        guard: WriteGuard,
        value: &T,
    ) -> Result<CommitReceipt, LedgerError> {
        let payload = serde_json::to_vec(value).map_err(|e| LedgerError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.commit(key, guard, Some(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_absent() {
        let live = Some(Head { version: 2, live: true });
        let dead = Some(Head { version: 3, live: false });
        assert!(matches!(
            WriteGuard::Absent.check("R1", live),
            Err(LedgerError::AlreadyExists(_))
        ));
        assert!(WriteGuard::Absent.check("R1", dead).is_ok());
        assert!(WriteGuard::Absent.check("R1", None).is_ok());
    }

    #[test]
    fn test_guard_unused_rejects_tombstoned_key() {
        let dead = Some(Head { version: 3, live: false });
        assert!(matches!(
            WriteGuard::Unused.check("P1", dead),
            Err(LedgerError::AlreadyExists(_))
        ));
        assert!(WriteGuard::Unused.check("P1", None).is_ok());
    }

    #[test]
    fn test_guard_version() {
        let head = Some(Head { version: 2, live: true });
        assert!(WriteGuard::Version(2).check("P1", head).is_ok());
        assert!(matches!(
            WriteGuard::Version(1).check("P1", head),
            Err(LedgerError::VersionConflict { found: Some(2), .. })
        ));
        assert!(WriteGuard::Version(1).check("P1", None).is_err());
    }
}
