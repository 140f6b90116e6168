//! Custody Events
//!
//! Notifications published for live dashboards. Delivery is at-most-once and
//! publishing never blocks or fails the operation that produced the event.

pub mod sink;

pub use sink::{BroadcastSink, EventSink, TracingSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event published after a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CustodyEvent {
    #[serde(rename_all = "camelCase")]
    RecordAdded {
        record_id: String,
        patient_id: String,
        author_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ConsentGranted {
        patient_id: String,
        provider_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ConsentRevoked {
        patient_id: String,
        provider_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UserRegistered {
        user_id: String,
        role: String,
        org: String,
        timestamp: DateTime<Utc>,
    },
}

impl CustodyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CustodyEvent::RecordAdded { .. } => "recordAdded",
            CustodyEvent::ConsentGranted { .. } => "consentGranted",
            CustodyEvent::ConsentRevoked { .. } => "consentRevoked",
            CustodyEvent::UserRegistered { .. } => "userRegistered",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CustodyEvent::RecordAdded { timestamp, .. }
            | CustodyEvent::ConsentGranted { timestamp, .. }
            | CustodyEvent::ConsentRevoked { timestamp, .. }
            | CustodyEvent::UserRegistered { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to JSON for the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            CustodyEvent::RecordAdded {
                record_id,
                patient_id,
                author_id,
                ..
            } => format!("{} added record {} for {}", author_id, record_id, patient_id),
            CustodyEvent::ConsentGranted {
                patient_id,
                provider_id,
                ..
            } => format!("{} granted consent to {}", patient_id, provider_id),
            CustodyEvent::ConsentRevoked {
                patient_id,
                provider_id,
                ..
            } => format!("{} revoked consent from {}", patient_id, provider_id),
            CustodyEvent::UserRegistered { user_id, role, org, .. } => {
                format!("{} registered as {} in {}", user_id, role, org)
            }
        }
    }
}
