//! Write-path state machine.

use std::fmt;
use tracing::{debug, warn};

use crate::error::CustodyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Validating,
    ConsentCheck,
    EncryptStore,
    LedgerCommit,
    Done,
    Failed,
}

impl WriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::Validating => "VALIDATING",
            WriteStage::ConsentCheck => "CONSENT_CHECK",
            WriteStage::EncryptStore => "ENCRYPT_STORE",
            WriteStage::LedgerCommit => "LEDGER_COMMIT",
            WriteStage::Done => "DONE",
            WriteStage::Failed => "FAILED",
        }
    }

    /// Successor on the happy path. Terminal stages have none.
    pub fn next(&self) -> Option<WriteStage> {
        match self {
            WriteStage::Validating => Some(WriteStage::ConsentCheck),
            WriteStage::ConsentCheck => Some(WriteStage::EncryptStore),
            WriteStage::EncryptStore => Some(WriteStage::LedgerCommit),
            WriteStage::LedgerCommit => Some(WriteStage::Done),
            WriteStage::Done | WriteStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one `add_record` call through its stages.
#[derive(Debug)]
pub struct WriteProgress {
    record_id: String,
    stage: WriteStage,
    failed_at: Option<WriteStage>,
}

impl WriteProgress {
    pub fn start(record_id: &str) -> Self {
        debug!("{}: {}", record_id, WriteStage::Validating);
        Self {
            record_id: record_id.to_string(),
            stage: WriteStage::Validating,
            failed_at: None,
        }
    }

    pub fn stage(&self) -> WriteStage {
        self.stage
    }

    /// Stage the write was in when it failed.
    pub fn failed_at(&self) -> Option<WriteStage> {
        self.failed_at
    }

    pub fn advance(&mut self) -> WriteStage {
        if let Some(next) = self.stage.next() {
            debug!("{}: {} -> {}", self.record_id, self.stage, next);
            self.stage = next;
        }
        self.stage
    }

    /// Move to FAILED and hand the error back for propagation.
    pub fn fail(&mut self, err: CustodyError) -> CustodyError {
        if !self.stage.is_terminal() {
            warn!(
                "{}: {} -> {} ({})",
                self.record_id,
                self.stage,
                WriteStage::Failed,
                err.kind().as_str()
            );
            self.failed_at = Some(self.stage);
            self.stage = WriteStage::Failed;
        }
        err
    }
}
