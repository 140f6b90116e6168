//! Deterministic commit clock.
//!
//! Commit timestamps are a pure function of the ledger-wide commit sequence, so
//! every replica and every replay derives the same timestamp for the same commit.

use chrono::{DateTime, Duration, Utc};

use crate::config::LedgerConfig;

#[derive(Debug, Clone)]
pub struct CommitClock {
    genesis: DateTime<Utc>,
    tick_millis: i64,
}

impl CommitClock {
    pub fn new(genesis: DateTime<Utc>, tick_millis: i64) -> Self {
        Self {
            genesis,
            tick_millis: tick_millis.max(1),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.genesis, config.tick_millis)
    }

    /// Timestamp of the commit with the given sequence number.
    pub fn timestamp_for(&self, sequence: u64) -> DateTime<Utc> {
        let offset = i64::try_from(sequence)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.tick_millis);
        self.genesis
            .checked_add_signed(Duration::milliseconds(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for CommitClock {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}
