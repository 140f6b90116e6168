//! Record Custody
//!
//! Medical record envelopes, the write-path state machine, the custody engine
//! and its detached access-log writer.

pub mod access_log;
pub mod engine;
pub mod record;
pub mod stage;

pub use access_log::{AccessLogFailure, AccessLogWriter, AccessRequest};
pub use engine::{RecordCustodyEngine, RecordReceipt, RecordView};
pub use record::{
    AccessEvent, ClinicalPayload, IntegrityVerdict, MedicalRecord, ACTION_VIEWED, RECORD_DOC_TYPE,
};
pub use stage::{WriteProgress, WriteStage};
