//! Semantic audit events derived from ledger history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuditEventKind {
    Registered,
    #[serde(rename_all = "camelCase")]
    ConsentGranted { provider_id: String },
    #[serde(rename_all = "camelCase")]
    ConsentRevoked { provider_id: String },
    #[serde(rename_all = "camelCase")]
    RecordUploaded { record_id: String },
    #[serde(rename_all = "camelCase")]
    RecordViewed { record_id: String, actor_org: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Patient whose timeline this event belongs to.
    pub subject_id: String,
    pub actor_id: String,
    #[serde(flatten)]
    pub kind: AuditEventKind,
    /// Ledger transaction the event was derived from, when it maps to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::Registered => write!(f, "Registered"),
            AuditEventKind::ConsentGranted { provider_id } => write!(f, "Granted({})", provider_id),
            AuditEventKind::ConsentRevoked { provider_id } => write!(f, "Revoked({})", provider_id),
            AuditEventKind::RecordUploaded { record_id } => write!(f, "Uploaded({})", record_id),
            AuditEventKind::RecordViewed { record_id, .. } => write!(f, "Viewed({})", record_id),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} by {}",
            self.timestamp.to_rfc3339(),
            self.kind,
            self.actor_id
        )
    }
}

/// History entry or document left out of a reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    pub key: String,
    pub version: u64,
    pub reason: String,
}
