//! SQLite-backed ledger
//!
//! History rows are append-only; `ledger_state` mirrors the head of each key so
//! snapshot reads and queries do not scan history.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    CommitClock, CommitReceipt, FieldPredicate, Head, HistoryEntry, Ledger, LedgerError, Snapshot,
    WriteGuard, GENESIS_TX_ID,
};

pub struct SqliteLedger {
    pool: SqlitePool,
    clock: CommitClock,
    page_size: usize,
    commit_lock: Mutex<()>,
}

fn millis_to_utc(key: &str, millis: i64) -> Result<DateTime<Utc>, LedgerError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| LedgerError::Corrupt {
            key: key.to_string(),
            reason: format!("invalid commit timestamp {}", millis),
        })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry, LedgerError> {
    let key: String = row.try_get("key")?;
    let committed_at: i64 = row.try_get("committed_at")?;
    Ok(HistoryEntry {
        timestamp: millis_to_utc(&key, committed_at)?,
        version: row.try_get::<i64, _>("version")? as u64,
        sequence: row.try_get::<i64, _>("sequence")? as u64,
        payload: row.try_get("payload")?,
        previous_tx_id: row.try_get("previous_tx_id")?,
        tx_id: row.try_get("tx_id")?,
        key,
    })
}

fn row_to_snapshot(row: &SqliteRow) -> Result<Option<Snapshot>, LedgerError> {
    let key: String = row.try_get("key")?;
    let payload: Option<Vec<u8>> = row.try_get("payload")?;
    let Some(payload) = payload else {
        return Ok(None);
    };
    let committed_at: i64 = row.try_get("committed_at")?;
    Ok(Some(Snapshot {
        timestamp: millis_to_utc(&key, committed_at)?,
        version: row.try_get::<i64, _>("version")? as u64,
        tx_id: row.try_get("tx_id")?,
        payload,
        key,
    }))
}

impl SqliteLedger {
    pub async fn connect(database_url: &str, clock: CommitClock) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let ledger = Self::from_pool(pool, clock);
        ledger.run_migrations().await?;
        info!("Opened ledger at {}", database_url);
        Ok(ledger)
    }

    /// Private in-memory database. A single pinned connection keeps it alive.
    pub async fn connect_in_memory(clock: CommitClock) -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let ledger = Self::from_pool(pool, clock);
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    pub fn from_pool(pool: SqlitePool, clock: CommitClock) -> Self {
        Self {
            pool,
            clock,
            page_size: super::DEFAULT_HISTORY_PAGE_SIZE,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(include_str!("../../migrations/001_ledger.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn commit(
        &self,
        key: &str,
        guard: WriteGuard,
        payload: Option<Vec<u8>>,
    ) -> Result<CommitReceipt, LedgerError> {
        let _lock = self.commit_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let head = sqlx::query(
            "SELECT version, payload IS NOT NULL AS live, tx_id FROM ledger_state WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| -> Result<(Head, String), LedgerError> {
            Ok((
                Head {
                    version: row.try_get::<i64, _>("version")? as u64,
                    live: row.try_get::<i64, _>("live")? != 0,
                },
                row.try_get("tx_id")?,
            ))
        })
        .transpose()?;

        guard.check(key, head.as_ref().map(|(h, _)| *h))?;

        if payload.is_none() && !head.as_ref().is_some_and(|(h, _)| h.live) {
            return Err(LedgerError::NotFound(key.to_string()));
        }

        let sequence: i64 = sqlx::query("SELECT sequence FROM ledger_meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?
            .try_get("sequence")?;
        let sequence = sequence as u64 + 1;

        let (version, previous_tx_id) = match &head {
            Some((h, tx_id)) => (h.version + 1, tx_id.clone()),
            None => (1, GENESIS_TX_ID.to_string()),
        };

        let entry = HistoryEntry::seal(
            key,
            version,
            sequence,
            self.clock.timestamp_for(sequence),
            payload,
            &previous_tx_id,
        );
        let committed_at = entry.timestamp.timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO ledger_history
            (key, version, sequence, committed_at, payload, previous_tx_id, tx_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(to_i64(entry.version))
        .bind(to_i64(entry.sequence))
        .bind(committed_at)
        .bind(entry.payload.as_deref())
        .bind(&entry.previous_tx_id)
        .bind(&entry.tx_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                LedgerError::VersionConflict {
                    key: key.to_string(),
                    expected: version - 1,
                    found: None,
                }
            }
            other => LedgerError::from(other),
        })?;

        sqlx::query(
            r#"
            INSERT INTO ledger_state (key, version, sequence, committed_at, payload, tx_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                version = excluded.version,
                sequence = excluded.sequence,
                committed_at = excluded.committed_at,
                payload = excluded.payload,
                tx_id = excluded.tx_id
            "#,
        )
        .bind(key)
        .bind(to_i64(entry.version))
        .bind(to_i64(entry.sequence))
        .bind(committed_at)
        .bind(entry.payload.as_deref())
        .bind(&entry.tx_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE ledger_meta SET sequence = ? WHERE id = 1")
            .bind(to_i64(sequence))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("Committed {} v{} (seq {})", key, version, sequence);
        Ok(CommitReceipt::from(&entry))
    }

    async fn get(&self, key: &str) -> Result<Option<Snapshot>, LedgerError> {
        let row = sqlx::query(
            "SELECT key, version, committed_at, payload, tx_id FROM ledger_state WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_snapshot(&row),
            None => Ok(None),
        }
    }

    async fn head_version(&self, key: &str) -> Result<Option<u64>, LedgerError> {
        let row = sqlx::query("SELECT version FROM ledger_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<i64, _>("version")? as u64),
            None => None,
        })
    }

    async fn history_page(
        &self,
        key: &str,
        after_version: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT key, version, sequence, committed_at, payload, previous_tx_id, tx_id
            FROM ledger_history
            WHERE key = ? AND version > ?
            ORDER BY version ASC
            LIMIT ?
            "#,
        )
        .bind(key)
        .bind(to_i64(after_version.unwrap_or(0)))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn query(&self, predicate: &FieldPredicate) -> Result<Vec<Snapshot>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT key, version, committed_at, payload, tx_id
            FROM ledger_state
            WHERE payload IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            if let Some(snapshot) = row_to_snapshot(row)? {
                if predicate.matches_payload(&snapshot.payload) {
                    matches.push(snapshot);
                }
            }
        }
        Ok(matches)
    }

    async fn now(&self) -> Result<DateTime<Utc>, LedgerError> {
        let sequence: i64 = sqlx::query("SELECT sequence FROM ledger_meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?
            .try_get("sequence")?;
        Ok(self.clock.timestamp_for(sequence as u64 + 1))
    }

    fn history_page_size(&self) -> usize {
        self.page_size
    }
}
