//! Audit Trail Reconstructor
//!
//! Reads ledger history and record documents, then hands them to the pure
//! replay functions. Reconstruction never aborts on bad data: unreadable
//! entries are listed in the report instead.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::events::{AuditEvent, SkippedEntry};
use super::replay::{merge_newest_first, record_events, replay_profile_history};
use crate::consent::USER_DOC_TYPE;
use crate::custody::{MedicalRecord, RECORD_DOC_TYPE};
use crate::error::CustodyError;
use crate::identity::{validate_identifier, CallerContext, Role};
use crate::ledger::{FieldPredicate, Ledger};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocTypeView {
    doc_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// `None` for the system-wide timeline.
    pub subject_id: Option<String>,
    /// Newest first.
    pub events: Vec<AuditEvent>,
    pub skipped: Vec<SkippedEntry>,
}

pub struct AuditTrail {
    ledger: Arc<dyn Ledger>,
}

impl AuditTrail {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Timeline of one patient: profile history plus every record of theirs.
    pub async fn audit_log(&self, subject_id: &str) -> Result<AuditReport, CustodyError> {
        validate_identifier("subjectId", subject_id)?;

        let mut events = Vec::new();
        let mut skipped = Vec::new();
        self.replay_subject(subject_id, &mut events, &mut skipped).await?;

        let predicate = FieldPredicate::new()
            .eq("docType", RECORD_DOC_TYPE)
            .eq("patientId", subject_id);
        self.replay_records(&predicate, &mut events, &mut skipped).await?;

        info!(
            "Reconstructed {} audit events for {} ({} skipped)",
            events.len(),
            subject_id,
            skipped.len()
        );
        Ok(AuditReport {
            subject_id: Some(subject_id.to_string()),
            events: merge_newest_first(events),
            skipped,
        })
    }

    /// `audit_log` restricted to the subject themselves and admins.
    pub async fn audit_log_as(
        &self,
        caller: &CallerContext,
        subject_id: &str,
    ) -> Result<AuditReport, CustodyError> {
        if caller.caller_id != subject_id && !caller.is_admin() {
            warn!("{} denied audit log of {}", caller.caller_id, subject_id);
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                &format!("cannot read audit log of {}", subject_id),
            ));
        }
        self.audit_log(subject_id).await
    }

    /// Every patient's consent history and every record's uploads and views.
    pub async fn system_events(&self, caller: &CallerContext) -> Result<AuditReport, CustodyError> {
        if !caller.is_admin() {
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                "only admins can read system events",
            ));
        }

        let patients = FieldPredicate::new()
            .eq("docType", USER_DOC_TYPE)
            .eq("role", Role::Patient.as_str());
        let mut patient_ids: Vec<String> = self
            .ledger
            .query(&patients)
            .await?
            .into_iter()
            .map(|snapshot| snapshot.key)
            .collect();
        patient_ids.sort();

        let mut events = Vec::new();
        let mut skipped = Vec::new();
        for patient_id in &patient_ids {
            self.replay_subject(patient_id, &mut events, &mut skipped).await?;
        }

        let records = FieldPredicate::new().eq("docType", RECORD_DOC_TYPE);
        self.replay_records(&records, &mut events, &mut skipped).await?;

        Ok(AuditReport {
            subject_id: None,
            events: merge_newest_first(events),
            skipped,
        })
    }

    async fn replay_subject(
        &self,
        subject_id: &str,
        events: &mut Vec<AuditEvent>,
        skipped: &mut Vec<SkippedEntry>,
    ) -> Result<(), CustodyError> {
        let history = self.ledger.history(subject_id).collect_all().await?;
        let latest_doc_type = history
            .iter()
            .rev()
            .find_map(|entry| entry.json::<DocTypeView>().ok())
            .and_then(|view| view.doc_type);
        if latest_doc_type.as_deref() != Some(USER_DOC_TYPE) {
            return Err(CustodyError::not_found("User", subject_id));
        }
        let replay = replay_profile_history(subject_id, &history);
        events.extend(replay.events);
        skipped.extend(replay.skipped);
        Ok(())
    }

    async fn replay_records(
        &self,
        predicate: &FieldPredicate,
        events: &mut Vec<AuditEvent>,
        skipped: &mut Vec<SkippedEntry>,
    ) -> Result<(), CustodyError> {
        let mut snapshots = self.ledger.query(predicate).await?;
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));

        for snapshot in snapshots {
            match snapshot.json::<MedicalRecord>() {
                Ok(record) => events.extend(record_events(&record)),
                Err(e) => {
                    warn!("Skipping record {} during audit replay: {}", snapshot.key, e);
                    skipped.push(SkippedEntry {
                        key: snapshot.key.clone(),
                        version: snapshot.version,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
