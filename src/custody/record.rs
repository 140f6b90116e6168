//! Medical record envelope as persisted on the ledger.
//!
//! The envelope is fixed; everything the client supplies lives inside the
//! opaque `clinicalPayload` field. Older documents used different key names
//! and millisecond timestamps, both of which still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blob::BlobAddress;
use crate::error::CustodyError;

pub const RECORD_DOC_TYPE: &str = "MedicalRecord";
pub const ACTION_VIEWED: &str = "VIEWED";

fn record_doc_type() -> String {
    RECORD_DOC_TYPE.to_string()
}

fn viewed() -> String {
    ACTION_VIEWED.to_string()
}

/// Timestamps are written as RFC 3339 and read from either RFC 3339 strings or
/// epoch milliseconds.
mod flex_timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(D::Error::custom),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(|| D::Error::custom(format!("invalid millisecond timestamp {}", n))),
            other => Err(D::Error::custom(format!("invalid timestamp {}", other))),
        }
    }
}

/// Client-supplied clinical fields. Always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClinicalPayload(Map<String, Value>);

impl ClinicalPayload {
    pub fn parse(value: Value, max_bytes: usize) -> Result<Self, CustodyError> {
        let Value::Object(fields) = value else {
            return Err(CustodyError::ValidationError(
                "clinicalPayload must be a JSON object".to_string(),
            ));
        };
        let size = serde_json::to_vec(&fields)?.len();
        if size > max_bytes {
            return Err(CustodyError::ValidationError(format!(
                "clinicalPayload is {} bytes, limit is {}",
                size, max_bytes
            )));
        }
        Ok(Self(fields))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEvent {
    #[serde(alias = "user")]
    pub actor_id: String,
    #[serde(alias = "org", default)]
    pub actor_org: String,
    #[serde(default = "viewed")]
    pub action: String,
    #[serde(with = "flex_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredRecord")]
pub struct MedicalRecord {
    pub doc_type: String,
    pub record_id: String,
    pub patient_id: String,
    pub author_id: String,
    pub custodian_org_id: String,
    pub content_address: Option<BlobAddress>,
    /// Hex SHA-256 of the plaintext captured at write time. Absent on records
    /// written before anchoring existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    #[serde(with = "flex_timestamp")]
    pub created_at: DateTime<Utc>,
    pub clinical_payload: ClinicalPayload,
    pub access_log: Vec<AccessEvent>,
}

/// On-ledger shape of a record, current or legacy. Legacy documents carry
/// their clinical fields at the top level; those land in `extra_fields`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    #[serde(default = "record_doc_type")]
    doc_type: String,
    record_id: String,
    patient_id: String,
    #[serde(alias = "doctorId")]
    author_id: String,
    #[serde(alias = "hospitalId", default)]
    custodian_org_id: String,
    #[serde(alias = "ipfsCid", alias = "ipfsHash", default)]
    content_address: Option<BlobAddress>,
    #[serde(alias = "fileHash", alias = "checksum", default)]
    content_digest: Option<String>,
    #[serde(alias = "timestamp", with = "flex_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    clinical_payload: ClinicalPayload,
    #[serde(alias = "accessHistory", default)]
    access_log: Vec<AccessEvent>,
    #[serde(flatten)]
    extra_fields: Map<String, Value>,
}

impl From<StoredRecord> for MedicalRecord {
    fn from(stored: StoredRecord) -> Self {
        let mut clinical_payload = stored.clinical_payload;
        for (field, value) in stored.extra_fields {
            clinical_payload.0.entry(field).or_insert(value);
        }
        Self {
            doc_type: stored.doc_type,
            record_id: stored.record_id,
            patient_id: stored.patient_id,
            author_id: stored.author_id,
            custodian_org_id: stored.custodian_org_id,
            content_address: stored.content_address,
            content_digest: stored.content_digest,
            created_at: stored.created_at,
            clinical_payload,
            access_log: stored.access_log,
        }
    }
}

impl MedicalRecord {
    /// Append a view, clamping its timestamp so the log never goes backwards.
    pub fn record_view(&mut self, actor_id: &str, actor_org: &str, at: DateTime<Utc>) {
        let timestamp = self
            .access_log
            .last()
            .map_or(at, |last| last.timestamp.max(at));
        self.access_log.push(AccessEvent {
            actor_id: actor_id.to_string(),
            actor_org: actor_org.to_string(),
            action: viewed(),
            timestamp,
        });
    }
}

/// Integrity classification attached to every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityVerdict {
    Valid,
    Tampered,
    NoAnchor,
}

impl IntegrityVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityVerdict::Valid => "VALID",
            IntegrityVerdict::Tampered => "TAMPERED",
            IntegrityVerdict::NoAnchor => "NO_ANCHOR",
        }
    }

    /// Compare the anchored digest with one recomputed from retrieved
    /// plaintext. `None` for `calculated` means the plaintext could not be
    /// recovered at all.
    pub fn classify(anchored: Option<&str>, calculated: Option<&str>) -> Self {
        match (anchored, calculated) {
            (None, _) => IntegrityVerdict::NoAnchor,
            (Some(a), Some(c)) if a.eq_ignore_ascii_case(c) => IntegrityVerdict::Valid,
            _ => IntegrityVerdict::Tampered,
        }
    }
}
