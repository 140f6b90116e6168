//! In-process ledger. A single write lock serializes commits, which also gives
//! per-key serialization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    CommitClock, CommitReceipt, FieldPredicate, Head, HistoryEntry, Ledger, LedgerError, Snapshot,
    WriteGuard, GENESIS_TX_ID,
};

#[derive(Default)]
struct MemoryState {
    histories: HashMap<String, Vec<HistoryEntry>>,
    sequence: u64,
}

#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<RwLock<MemoryState>>,
    clock: CommitClock,
    page_size: usize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(CommitClock::default())
    }

    pub fn with_clock(clock: CommitClock) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            clock,
            page_size: super::DEFAULT_HISTORY_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Total number of history entries across all keys.
    pub async fn total_entries(&self) -> usize {
        self.state.read().await.histories.values().map(Vec::len).sum()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_of(entry: &HistoryEntry) -> Option<Snapshot> {
    entry.payload.as_ref().map(|payload| Snapshot {
        key: entry.key.clone(),
        version: entry.version,
        timestamp: entry.timestamp,
        tx_id: entry.tx_id.clone(),
        payload: payload.clone(),
    })
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn commit(
        &self,
        key: &str,
        guard: WriteGuard,
        payload: Option<Vec<u8>>,
    ) -> Result<CommitReceipt, LedgerError> {
        let mut state = self.state.write().await;

        let head = state.histories.get(key).and_then(|h| h.last());
        guard.check(
            key,
            head.map(|e| Head {
                version: e.version,
                live: !e.is_tombstone(),
            }),
        )?;

        if payload.is_none() && head.map_or(true, HistoryEntry::is_tombstone) {
            return Err(LedgerError::NotFound(key.to_string()));
        }

        let version = head.map_or(1, |e| e.version + 1);
        let previous_tx_id = head
            .map(|e| e.tx_id.clone())
            .unwrap_or_else(|| GENESIS_TX_ID.to_string());
        let sequence = state.sequence + 1;

        let entry = HistoryEntry::seal(
            key,
            version,
            sequence,
            self.clock.timestamp_for(sequence),
            payload,
            &previous_tx_id,
        );
        let receipt = CommitReceipt::from(&entry);

        state.sequence = sequence;
        state
            .histories
            .entry(key.to_string())
            .or_default()
            .push(entry);

        debug!("Committed {} v{} (seq {})", key, version, sequence);
        Ok(receipt)
    }

    async fn get(&self, key: &str) -> Result<Option<Snapshot>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .histories
            .get(key)
            .and_then(|h| h.last())
            .and_then(snapshot_of))
    }

    async fn head_version(&self, key: &str) -> Result<Option<u64>, LedgerError> {
        let state = self.state.read().await;
        Ok(state.histories.get(key).and_then(|h| h.last()).map(|e| e.version))
    }

    async fn history_page(
        &self,
        key: &str,
        after_version: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        let state = self.state.read().await;
        let after = after_version.unwrap_or(0);
        Ok(state
            .histories
            .get(key)
            .map(|h| {
                h.iter()
                    .filter(|e| e.version > after)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(&self, predicate: &FieldPredicate) -> Result<Vec<Snapshot>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .histories
            .values()
            .filter_map(|h| h.last())
            .filter_map(snapshot_of)
            .filter(|s| predicate.matches_payload(&s.payload))
            .collect())
    }

    async fn now(&self) -> Result<DateTime<Utc>, LedgerError> {
        let state = self.state.read().await;
        Ok(self.clock.timestamp_for(state.sequence + 1))
    }

    fn history_page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::verify_history;

    #[tokio::test]
    async fn test_put_get_history() {
        let ledger = MemoryLedger::new();
        let first = ledger.put("P1", b"{\"v\":1}".to_vec()).await.unwrap();
        let second = ledger.put("P1", b"{\"v\":2}".to_vec()).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(second.timestamp > first.timestamp);

        let snapshot = ledger.get("P1").await.unwrap().unwrap();
        assert_eq!(snapshot.payload, b"{\"v\":2}".to_vec());

        let history = ledger.history_page("P1", None, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(verify_history(&history).is_valid);
    }

    #[tokio::test]
    async fn test_now_matches_next_commit() {
        let ledger = MemoryLedger::new();
        ledger.put("A", b"1".to_vec()).await.unwrap();
        let predicted = ledger.now().await.unwrap();
        let receipt = ledger.put("B", b"2".to_vec()).await.unwrap();
        assert_eq!(predicted, receipt.timestamp);
    }

    #[tokio::test]
    async fn test_absent_guard_and_tombstone() {
        let ledger = MemoryLedger::new();
        ledger.commit("R1", WriteGuard::Absent, Some(b"{}".to_vec())).await.unwrap();
        assert!(matches!(
            ledger.commit("R1", WriteGuard::Absent, Some(b"{}".to_vec())).await,
            Err(LedgerError::AlreadyExists(_))
        ));

        ledger.delete("R1").await.unwrap();
        assert!(ledger.get("R1").await.unwrap().is_none());
        assert_eq!(ledger.head_version("R1").await.unwrap(), Some(2));
        assert!(matches!(ledger.delete("R1").await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_query_skips_tombstones_and_garbage() {
        let ledger = MemoryLedger::new();
        ledger.put("U1", br#"{"docType":"user","role":"doctor"}"#.to_vec()).await.unwrap();
        ledger.put("U2", br#"{"docType":"user","role":"doctor"}"#.to_vec()).await.unwrap();
        ledger.put("U3", b"garbage".to_vec()).await.unwrap();
        ledger.delete("U2").await.unwrap();

        let found = ledger
            .query(&FieldPredicate::new().eq("role", "doctor"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "U1");
    }
}
