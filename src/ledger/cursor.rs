//! Paging cursor over a key's history.

use std::collections::VecDeque;

use super::{HistoryEntry, Ledger, LedgerError};

/// Lazy, finite, restartable walk over one key's history, oldest first.
///
/// The cursor pins the head version on its first fetch; versions committed
/// after that point are not visited until `restart`.
pub struct HistoryCursor<'a> {
    ledger: &'a dyn Ledger,
    key: String,
    page_size: usize,
    ceiling: Option<Option<u64>>,
    last_version: Option<u64>,
    buffer: VecDeque<HistoryEntry>,
    exhausted: bool,
}

impl<'a> HistoryCursor<'a> {
    pub fn new(ledger: &'a dyn Ledger, key: &str, page_size: usize) -> Self {
        Self {
            ledger,
            key: key.to_string(),
            page_size: page_size.max(1),
            ceiling: None,
            last_version: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn next(&mut self) -> Result<Option<HistoryEntry>, LedgerError> {
        if let Some(entry) = self.buffer.pop_front() {
            return Ok(Some(entry));
        }
        if self.exhausted {
            return Ok(None);
        }

        let ceiling = match self.ceiling {
            Some(ceiling) => ceiling,
            None => {
                let head = self.ledger.head_version(&self.key).await?;
                self.ceiling = Some(head);
                head
            }
        };

        let Some(ceiling) = ceiling else {
            self.exhausted = true;
            return Ok(None);
        };

        if self.last_version.is_some_and(|v| v >= ceiling) {
            self.exhausted = true;
            return Ok(None);
        }

        let page = self
            .ledger
            .history_page(&self.key, self.last_version, self.page_size)
            .await?;

        for entry in page {
            if entry.version > ceiling {
                break;
            }
            self.last_version = Some(entry.version);
            self.buffer.push_back(entry);
        }

        match self.buffer.pop_front() {
            Some(entry) => Ok(Some(entry)),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Rewind to the first version. The head is re-read on the next fetch.
    pub fn restart(&mut self) {
        self.ceiling = None;
        self.last_version = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub async fn collect_all(&mut self) -> Result<Vec<HistoryEntry>, LedgerError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
