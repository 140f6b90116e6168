//! User profile documents as stored on the ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::CustodyError;
use crate::identity::Role;
use crate::ledger::{CommitReceipt, Ledger, LedgerError, Snapshot, WriteGuard};

pub const USER_DOC_TYPE: &str = "user";

/// Optimistic commits retried this many times on a concurrent version bump.
pub(crate) const MAX_COMMIT_ATTEMPTS: usize = 3;

fn user_doc_type() -> String {
    USER_DOC_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Providers this patient has consented to. Empty for every other role.
    #[serde(default)]
    pub consents: BTreeSet<String>,
    #[serde(default = "user_doc_type")]
    pub doc_type: String,
}

impl UserProfile {
    pub fn new(user_id: &str, name: &str, role: Role, org: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            role,
            org: org.to_string(),
            email: None,
            consents: BTreeSet::new(),
            doc_type: user_doc_type(),
        }
    }

    pub fn has_consent(&self, provider_id: &str) -> bool {
        self.consents.contains(provider_id)
    }
}

/// Read a user's current profile. Keys holding anything other than a user
/// document are reported as missing users.
pub(crate) async fn load_user(
    ledger: &dyn Ledger,
    user_id: &str,
) -> Result<(Snapshot, UserProfile), CustodyError> {
    let snapshot = ledger
        .get(user_id)
        .await?
        .ok_or_else(|| CustodyError::not_found("User", user_id))?;

    let document: serde_json::Value = snapshot.json()?;
    if document.get("docType").and_then(|v| v.as_str()) != Some(USER_DOC_TYPE) {
        return Err(CustodyError::not_found("User", user_id));
    }

    let profile: UserProfile =
        serde_json::from_value(document).map_err(|e| LedgerError::Corrupt {
            key: user_id.to_string(),
            reason: e.to_string(),
        })?;
    Ok((snapshot, profile))
}

/// Read-modify-write of a profile under a version guard. `apply` returns
/// `false` when it made no change, in which case nothing is committed.
pub(crate) async fn update_user<F>(
    ledger: &dyn Ledger,
    user_id: &str,
    mut apply: F,
) -> Result<(UserProfile, Option<CommitReceipt>), CustodyError>
where
    F: FnMut(&mut UserProfile) -> Result<bool, CustodyError> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (snapshot, mut profile) = load_user(ledger, user_id).await?;
        if !apply(&mut profile)? {
            return Ok((profile, None));
        }

        let payload = serde_json::to_vec(&profile)?;
        match ledger
            .commit(user_id, WriteGuard::Version(snapshot.version), Some(payload))
            .await
        {
            Ok(receipt) => return Ok((profile, Some(receipt))),
            Err(LedgerError::VersionConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                debug!("Concurrent update of {}, retrying (attempt {})", user_id, attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }
}
