//! Consent Graph Manager
//!
//! A patient's consent set is the `consents` field of their profile. Grants and
//! revokes are read-modify-write commits on the patient's key.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::profile::{load_user, update_user};
use crate::error::CustodyError;
use crate::events::{CustodyEvent, EventSink};
use crate::identity::{validate_identifier, Role};
use crate::ledger::Ledger;

/// Outcome of a grant or revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentUpdate {
    pub patient_id: String,
    pub provider_id: String,
    /// False when the grant was already in place and nothing was committed.
    pub changed: bool,
    pub version: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct ConsentManager {
    ledger: Arc<dyn Ledger>,
    events: Arc<dyn EventSink>,
}

impl ConsentManager {
    pub fn new(ledger: Arc<dyn Ledger>, events: Arc<dyn EventSink>) -> Self {
        Self { ledger, events }
    }

    fn require_self(patient_id: &str, invoker_id: &str, action: &str) -> Result<(), CustodyError> {
        if invoker_id != patient_id {
            warn!("{} attempted to {} consent for {}", invoker_id, action, patient_id);
            return Err(CustodyError::access_denied(
                invoker_id,
                &format!("only patient {} can {} consent", patient_id, action),
            ));
        }
        Ok(())
    }

    pub async fn grant_consent(
        &self,
        patient_id: &str,
        provider_id: &str,
        invoker_id: &str,
    ) -> Result<ConsentUpdate, CustodyError> {
        Self::require_self(patient_id, invoker_id, "grant")?;
        validate_identifier("providerId", provider_id)?;

        let (_, provider) = load_user(self.ledger.as_ref(), provider_id).await?;
        if !provider.role.is_provider() {
            return Err(CustodyError::ValidationError(format!(
                "Consent can only be granted to doctors or hospitals, {} is a {}",
                provider_id, provider.role
            )));
        }

        let (_, receipt) = update_user(self.ledger.as_ref(), patient_id, |profile| {
            if profile.role != Role::Patient {
                return Err(CustodyError::ValidationError(format!(
                    "{} is not a patient",
                    patient_id
                )));
            }
            Ok(profile.consents.insert(provider_id.to_string()))
        })
        .await?;

        let Some(receipt) = receipt else {
            info!("{} already holds consent from {}", provider_id, patient_id);
            return Ok(ConsentUpdate {
                patient_id: patient_id.to_string(),
                provider_id: provider_id.to_string(),
                changed: false,
                version: None,
                timestamp: None,
            });
        };

        info!("{} granted consent to {}", patient_id, provider_id);
        self.events.publish(CustodyEvent::ConsentGranted {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            timestamp: receipt.timestamp,
        });

        Ok(ConsentUpdate {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            changed: true,
            version: Some(receipt.version),
            timestamp: Some(receipt.timestamp),
        })
    }

    pub async fn revoke_consent(
        &self,
        patient_id: &str,
        provider_id: &str,
        invoker_id: &str,
    ) -> Result<ConsentUpdate, CustodyError> {
        Self::require_self(patient_id, invoker_id, "revoke")?;

        let (_, receipt) = update_user(self.ledger.as_ref(), patient_id, |profile| {
            if !profile.consents.remove(provider_id) {
                return Err(CustodyError::ValidationError(format!(
                    "{} does not hold consent from {}",
                    provider_id, patient_id
                )));
            }
            Ok(true)
        })
        .await?;

        let receipt = receipt.ok_or_else(|| {
            CustodyError::LedgerError(format!("Revoke on {} produced no commit", patient_id))
        })?;

        info!("{} revoked consent from {}", patient_id, provider_id);
        self.events.publish(CustodyEvent::ConsentRevoked {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            timestamp: receipt.timestamp,
        });

        Ok(ConsentUpdate {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            changed: true,
            version: Some(receipt.version),
            timestamp: Some(receipt.timestamp),
        })
    }

    /// Whether `provider_id` currently holds consent from `patient_id`. Unknown
    /// patients authorize nobody.
    pub async fn is_authorized(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> Result<bool, CustodyError> {
        match load_user(self.ledger.as_ref(), patient_id).await {
            Ok((_, profile)) => Ok(profile.has_consent(provider_id)),
            Err(CustodyError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn consents_of(&self, patient_id: &str) -> Result<BTreeSet<String>, CustodyError> {
        let (_, profile) = load_user(self.ledger.as_ref(), patient_id).await?;
        Ok(profile.consents)
    }
}
