//! Record Custody Engine
//!
//! Orchestrates the write path (validate, consent check, encrypt and store,
//! ledger commit) and the read path (authorize, fetch, verify digest, log the
//! access out of band).

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::access_log::{AccessLogWriter, AccessRequest};
use super::record::{ClinicalPayload, IntegrityVerdict, MedicalRecord, RECORD_DOC_TYPE};
use super::stage::WriteProgress;
use crate::blob::{BlobAddress, BlobError, BlobStore};
use crate::config::RecordLimits;
use crate::consent::profile::load_user;
use crate::consent::ConsentManager;
use crate::digest::sha256_hex;
use crate::error::CustodyError;
use crate::events::{CustodyEvent, EventSink};
use crate::identity::{validate_identifier, CallerContext, Role};
use crate::ledger::{FieldPredicate, HistoryEntry, Ledger, LedgerError, Snapshot, WriteGuard};

/// Returned by a successful `add_record`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordReceipt {
    pub record_id: String,
    pub patient_id: String,
    pub content_address: BlobAddress,
    pub content_digest: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    pub tx_id: String,
}

/// Returned by `view_record`. A `Tampered` verdict still carries the record.
#[derive(Debug, Clone)]
pub struct RecordView {
    pub record: MedicalRecord,
    /// `None` when the stored ciphertext no longer decrypts.
    pub plaintext: Option<Vec<u8>>,
    pub verdict: IntegrityVerdict,
    pub calculated_digest: Option<String>,
}

pub struct RecordCustodyEngine {
    ledger: Arc<dyn Ledger>,
    blobs: Arc<dyn BlobStore>,
    consent: Arc<ConsentManager>,
    events: Arc<dyn EventSink>,
    access_log: AccessLogWriter,
    limits: RecordLimits,
}

impl RecordCustodyEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        consent: Arc<ConsentManager>,
        events: Arc<dyn EventSink>,
        access_log: AccessLogWriter,
        limits: RecordLimits,
    ) -> Self {
        Self {
            ledger,
            blobs,
            consent,
            events,
            access_log,
            limits,
        }
    }

    pub fn access_log(&self) -> &AccessLogWriter {
        &self.access_log
    }

    pub async fn add_record(
        &self,
        author: &CallerContext,
        patient_id: &str,
        record_id: &str,
        clinical_payload: Value,
        plaintext: &[u8],
    ) -> Result<RecordReceipt, CustodyError> {
        let mut progress = WriteProgress::start(record_id);

        // VALIDATING
        if !author.role.is_provider() {
            return Err(progress.fail(CustodyError::access_denied(
                &author.caller_id,
                "only doctors and hospitals can add records",
            )));
        }
        let payload = match self.validate_write(patient_id, record_id, clinical_payload, plaintext) {
            Ok(payload) => payload,
            Err(e) => return Err(progress.fail(e)),
        };
        match self.ledger.get(record_id).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                return Err(progress.fail(CustodyError::DuplicateError(format!(
                    "Record {} already exists",
                    record_id
                ))))
            }
            Err(e) => return Err(progress.fail(e.into())),
        }

        // CONSENT_CHECK
        progress.advance();
        if let Err(e) = self.check_write_consent(author, patient_id).await {
            return Err(progress.fail(e));
        }

        // ENCRYPT_STORE
        progress.advance();
        let content_digest = sha256_hex(plaintext);
        let content_address = match self.blobs.store(plaintext).await {
            Ok(address) => address,
            Err(e) => return Err(progress.fail(e.into())),
        };

        // LEDGER_COMMIT
        progress.advance();
        let receipt = match self
            .commit_record(author, patient_id, record_id, payload, &content_address, &content_digest)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    "Blob {} for {} left orphaned after failed commit",
                    content_address, record_id
                );
                return Err(progress.fail(e));
            }
        };

        progress.advance();
        info!(
            "{} added record {} for {} (digest {})",
            author.caller_id, record_id, patient_id, content_digest
        );
        self.events.publish(CustodyEvent::RecordAdded {
            record_id: record_id.to_string(),
            patient_id: patient_id.to_string(),
            author_id: author.caller_id.clone(),
            timestamp: receipt.created_at,
        });
        Ok(receipt)
    }

    fn validate_write(
        &self,
        patient_id: &str,
        record_id: &str,
        clinical_payload: Value,
        plaintext: &[u8],
    ) -> Result<ClinicalPayload, CustodyError> {
        validate_identifier("patientId", patient_id)?;
        validate_identifier("recordId", record_id)?;
        if plaintext.len() > self.limits.max_document_bytes {
            return Err(CustodyError::ValidationError(format!(
                "Document is {} bytes, limit is {}",
                plaintext.len(),
                self.limits.max_document_bytes
            )));
        }
        ClinicalPayload::parse(clinical_payload, self.limits.max_payload_bytes)
    }

    async fn check_write_consent(
        &self,
        author: &CallerContext,
        patient_id: &str,
    ) -> Result<(), CustodyError> {
        let (_, patient) = load_user(self.ledger.as_ref(), patient_id).await?;
        if patient.role != Role::Patient {
            return Err(CustodyError::ValidationError(format!(
                "{} is not a patient",
                patient_id
            )));
        }
        if !patient.has_consent(&author.caller_id) {
            warn!("{} has no consent from {}", author.caller_id, patient_id);
            return Err(CustodyError::access_denied(
                &author.caller_id,
                &format!("no consent from patient {}", patient_id),
            ));
        }
        Ok(())
    }

    async fn commit_record(
        &self,
        author: &CallerContext,
        patient_id: &str,
        record_id: &str,
        clinical_payload: ClinicalPayload,
        content_address: &BlobAddress,
        content_digest: &str,
    ) -> Result<RecordReceipt, CustodyError> {
        let created_at = self.ledger.now().await?;
        let record = MedicalRecord {
            doc_type: RECORD_DOC_TYPE.to_string(),
            record_id: record_id.to_string(),
            patient_id: patient_id.to_string(),
            author_id: author.caller_id.clone(),
            custodian_org_id: author.org.clone(),
            content_address: Some(content_address.clone()),
            content_digest: Some(content_digest.to_string()),
            created_at,
            clinical_payload,
            access_log: Vec::new(),
        };

        let receipt = self
            .ledger
            .commit_json(record_id, WriteGuard::Absent, &record)
            .await
            .map_err(|e| match e {
                LedgerError::AlreadyExists(_) => {
                    CustodyError::DuplicateError(format!("Record {} already exists", record_id))
                }
                other => other.into(),
            })?;

        Ok(RecordReceipt {
            record_id: record_id.to_string(),
            patient_id: patient_id.to_string(),
            content_address: content_address.clone(),
            content_digest: content_digest.to_string(),
            created_at,
            version: receipt.version,
            tx_id: receipt.tx_id,
        })
    }

    pub async fn view_record(
        &self,
        reader: &CallerContext,
        record_id: &str,
    ) -> Result<RecordView, CustodyError> {
        let (_, record) = self.load_record(record_id).await?;
        self.check_read_access(reader, &record).await?;
        let viewed_at = self.ledger.now().await?;

        let address = record.content_address.clone().ok_or_else(|| {
            CustodyError::StorageError(format!("Record {} has no content address", record_id))
        })?;

        let plaintext = match self.blobs.retrieve(&address).await {
            Ok(bytes) => Some(bytes),
            Err(BlobError::Decrypt(reason)) => {
                warn!("Ciphertext of {} fails authentication: {}", record_id, reason);
                None
            }
            Err(e) => return Err(e.into()),
        };

        let calculated_digest = plaintext.as_deref().map(sha256_hex);
        let verdict = IntegrityVerdict::classify(
            record.content_digest.as_deref(),
            calculated_digest.as_deref(),
        );
        if verdict == IntegrityVerdict::Tampered {
            warn!(
                "INTEGRITY_WARNING: {} digest mismatch (anchored {:?}, calculated {:?})",
                record_id, record.content_digest, calculated_digest
            );
        }

        self.access_log.append(AccessRequest {
            record_id: record_id.to_string(),
            actor_id: reader.caller_id.clone(),
            actor_org: reader.org.clone(),
            viewed_at,
        });

        debug!("{} viewed {} ({})", reader.caller_id, record_id, verdict.as_str());
        Ok(RecordView {
            record,
            plaintext,
            verdict,
            calculated_digest,
        })
    }

    /// Records of one patient, newest first. Visible to the patient and to
    /// consented providers.
    pub async fn records_for_patient(
        &self,
        caller: &CallerContext,
        patient_id: &str,
    ) -> Result<Vec<MedicalRecord>, CustodyError> {
        let allowed = caller.caller_id == patient_id
            || (caller.role.is_provider()
                && self.consent.is_authorized(patient_id, &caller.caller_id).await?);
        if !allowed {
            warn!("{} denied record list of {}", caller.caller_id, patient_id);
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                &format!("no access to records of {}", patient_id),
            ));
        }

        let predicate = FieldPredicate::new()
            .eq("docType", RECORD_DOC_TYPE)
            .eq("patientId", patient_id);
        let mut records = decode_records(self.ledger.query(&predicate).await?);
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Records authored by the calling provider, newest first.
    pub async fn records_by_author(
        &self,
        caller: &CallerContext,
    ) -> Result<Vec<MedicalRecord>, CustodyError> {
        if !caller.role.is_provider() {
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                "only doctors and hospitals author records",
            ));
        }

        let mut by_id = BTreeMap::new();
        for field in ["authorId", "doctorId"] {
            let predicate = FieldPredicate::new()
                .eq("docType", RECORD_DOC_TYPE)
                .eq(field, caller.caller_id.as_str());
            for record in decode_records(self.ledger.query(&predicate).await?) {
                by_id.insert(record.record_id.clone(), record);
            }
        }

        let mut records: Vec<MedicalRecord> = by_id.into_values().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Full ledger history of a record, oldest first.
    pub async fn record_history(
        &self,
        caller: &CallerContext,
        record_id: &str,
    ) -> Result<Vec<HistoryEntry>, CustodyError> {
        let (_, record) = self.load_record(record_id).await?;
        self.check_read_access(caller, &record).await?;
        Ok(self.ledger.history(record_id).collect_all().await?)
    }

    async fn load_record(&self, record_id: &str) -> Result<(Snapshot, MedicalRecord), CustodyError> {
        let (snapshot, record) = self
            .ledger
            .get_json::<MedicalRecord>(record_id)
            .await?
            .ok_or_else(|| CustodyError::not_found("Record", record_id))?;
        if record.doc_type != RECORD_DOC_TYPE {
            return Err(CustodyError::not_found("Record", record_id));
        }
        Ok((snapshot, record))
    }

    async fn check_read_access(
        &self,
        reader: &CallerContext,
        record: &MedicalRecord,
    ) -> Result<(), CustodyError> {
        if reader.caller_id == record.patient_id {
            return Ok(());
        }
        if reader.role.is_provider()
            && self
                .consent
                .is_authorized(&record.patient_id, &reader.caller_id)
                .await?
        {
            return Ok(());
        }
        warn!(
            "{} denied access to {} of {}",
            reader.caller_id, record.record_id, record.patient_id
        );
        Err(CustodyError::access_denied(
            &reader.caller_id,
            &format!("no consent from patient {}", record.patient_id),
        ))
    }
}

fn decode_records(snapshots: Vec<Snapshot>) -> Vec<MedicalRecord> {
    snapshots
        .into_iter()
        .filter_map(|snapshot| match snapshot.json::<MedicalRecord>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable record {}: {}", snapshot.key, e);
                None
            }
        })
        .collect()
}

fn sort_newest_first(records: &mut [MedicalRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
}
