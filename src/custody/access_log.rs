//! Detached access-log writer.
//!
//! Reads enqueue an access entry and return immediately. A background task
//! applies entries to the ledger with bounded retries; entries it gives up on
//! are reported on a separate failure channel instead of to the reader.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::record::{MedicalRecord, RECORD_DOC_TYPE};
use crate::config::AccessLogConfig;
use crate::error::CustodyError;
use crate::ledger::{Ledger, WriteGuard};

/// One view to be appended to a record's access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub record_id: String,
    pub actor_id: String,
    pub actor_org: String,
    /// Ledger clock reading taken when the read was served.
    pub viewed_at: DateTime<Utc>,
}

/// An access entry that never reached the ledger.
#[derive(Debug, Clone)]
pub struct AccessLogFailure {
    pub request: AccessRequest,
    pub attempts: u32,
    pub error: String,
}

/// Commands processed by the writer task.
enum AccessLogCommand {
    Append(AccessRequest),
    /// Replies once every command queued before it has been processed.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct AccessLogWriter {
    commands: mpsc::Sender<AccessLogCommand>,
    failures: mpsc::Sender<AccessLogFailure>,
}

impl AccessLogWriter {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn(
        ledger: Arc<dyn Ledger>,
        config: &AccessLogConfig,
    ) -> (Self, mpsc::Receiver<AccessLogFailure>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (fail_tx, fail_rx) = mpsc::channel(config.failure_channel_capacity.max(1));

        let worker = Worker {
            ledger,
            failures: fail_tx.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        };
        tokio::spawn(worker.run(cmd_rx));

        (
            Self {
                commands: cmd_tx,
                failures: fail_tx,
            },
            fail_rx,
        )
    }

    /// Queue an entry without waiting. A full or closed queue is reported as a
    /// failure, never to the caller.
    pub fn append(&self, request: AccessRequest) {
        if let Err(e) = self.commands.try_send(AccessLogCommand::Append(request.clone())) {
            warn!("Access log queue rejected entry for {}: {}", request.record_id, e);
            report(
                &self.failures,
                AccessLogFailure {
                    request,
                    attempts: 0,
                    error: e.to_string(),
                },
            );
        }
    }

    /// Wait until everything queued so far has been written or given up on.
    pub async fn flush(&self) -> Result<(), CustodyError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(AccessLogCommand::Flush(reply))
            .await
            .map_err(|_| CustodyError::LedgerError("Access log writer stopped".to_string()))?;
        done.await
            .map_err(|_| CustodyError::LedgerError("Access log writer stopped".to_string()))
    }
}

fn report(failures: &mpsc::Sender<AccessLogFailure>, failure: AccessLogFailure) {
    if failures.try_send(failure).is_err() {
        error!("Access log failure channel full or closed; dropping failure report");
    }
}

struct Worker {
    ledger: Arc<dyn Ledger>,
    failures: mpsc::Sender<AccessLogFailure>,
    max_attempts: u32,
    backoff: Duration,
}

impl Worker {
    async fn run(self, mut commands: mpsc::Receiver<AccessLogCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                AccessLogCommand::Append(request) => self.write_with_retry(request).await,
                AccessLogCommand::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        debug!("Access log writer stopped");
    }

    async fn write_with_retry(&self, request: AccessRequest) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match append_access(self.ledger.as_ref(), &request).await {
                Ok(version) => {
                    debug!(
                        "Logged view of {} by {} (v{})",
                        request.record_id, request.actor_id, version
                    );
                    return;
                }
                Err(e) if e.is_retriable() && attempt < self.max_attempts => {
                    warn!(
                        "Access log write for {} failed (attempt {}): {}",
                        request.record_id, attempt, e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    error!(
                        "Giving up on access log entry for {} after {} attempts: {}",
                        request.record_id, attempt, e
                    );
                    report(
                        &self.failures,
                        AccessLogFailure {
                            request,
                            attempts: attempt,
                            error: e.to_string(),
                        },
                    );
                    return;
                }
            }
        }
    }
}

/// Read-modify-write of the record's access log under a version guard.
///
/// Only the log array of the stored document is touched, so fields the
/// envelope does not model survive the write.
async fn append_access(ledger: &dyn Ledger, request: &AccessRequest) -> Result<u64, CustodyError> {
    let (snapshot, mut document) = ledger
        .get_json::<Value>(&request.record_id)
        .await?
        .ok_or_else(|| CustodyError::not_found("Record", &request.record_id))?;
    let mut record: MedicalRecord = serde_json::from_value(document.clone())?;
    if record.doc_type != RECORD_DOC_TYPE {
        return Err(CustodyError::not_found("Record", &request.record_id));
    }

    record.record_view(&request.actor_id, &request.actor_org, request.viewed_at);
    let Some(event) = record.access_log.last() else {
        return Err(CustodyError::LedgerError(format!(
            "Access entry for {} was not recorded",
            request.record_id
        )));
    };
    let event = serde_json::to_value(event)?;

    let fields = document.as_object_mut().ok_or_else(|| {
        CustodyError::ValidationError(format!("Record {} is not a JSON object", request.record_id))
    })?;
    let log_field = if fields.contains_key(LEGACY_LOG_FIELD) && !fields.contains_key(LOG_FIELD) {
        LEGACY_LOG_FIELD
    } else {
        LOG_FIELD
    };
    match fields.entry(log_field).or_insert_with(|| Value::Array(Vec::new())) {
        Value::Array(entries) => entries.push(event),
        other => *other = Value::Array(vec![event]),
    }

    let receipt = ledger
        .commit_json(&request.record_id, WriteGuard::Version(snapshot.version), &document)
        .await?;
    Ok(receipt.version)
}

const LOG_FIELD: &str = "accessLog";
const LEGACY_LOG_FIELD: &str = "accessHistory";
