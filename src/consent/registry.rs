//! User Registry
//!
//! Privileged registration of patients, doctors, hospitals and admins.

use std::sync::Arc;
use tracing::{info, warn};

use super::profile::{load_user, update_user, UserProfile, USER_DOC_TYPE};
use crate::config::RegistrationConfig;
use crate::error::CustodyError;
use crate::events::{CustodyEvent, EventSink};
use crate::identity::{validate_identifier, CallerContext, Role};
use crate::ledger::{FieldPredicate, Ledger, WriteGuard};

pub struct UserRegistry {
    ledger: Arc<dyn Ledger>,
    events: Arc<dyn EventSink>,
    registration: RegistrationConfig,
}

impl UserRegistry {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        events: Arc<dyn EventSink>,
        registration: RegistrationConfig,
    ) -> Self {
        Self {
            ledger,
            events,
            registration,
        }
    }

    /// Patients are registered by admins of the patient org, providers by
    /// admins of the provider org. Either org may register admins.
    fn check_registrar(&self, caller: &CallerContext, role: Role) -> Result<(), CustodyError> {
        if !caller.is_admin() {
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                "only admins can register users",
            ));
        }

        let patient_org = caller.org == self.registration.patient_org;
        let provider_org = caller.org == self.registration.provider_org;
        let allowed = match role {
            Role::Patient => patient_org,
            Role::Doctor | Role::Hospital => provider_org,
            Role::Admin => patient_org || provider_org,
        };
        if !allowed {
            warn!(
                "{} ({}) may not register a {}",
                caller.caller_id, caller.org, role
            );
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                &format!("org {} cannot register {} users", caller.org, role),
            ));
        }
        Ok(())
    }

    pub async fn register_user(
        &self,
        caller: &CallerContext,
        user_id: &str,
        name: &str,
        role: Role,
        org: &str,
    ) -> Result<UserProfile, CustodyError> {
        self.check_registrar(caller, role)?;
        validate_identifier("userId", user_id)?;
        validate_identifier("org", org)?;
        if name.trim().is_empty() {
            return Err(CustodyError::ValidationError("Name must not be empty".to_string()));
        }

        let profile = UserProfile::new(user_id, name.trim(), role, org);
        let receipt = self
            .ledger
            .commit_json(user_id, WriteGuard::Unused, &profile)
            .await
            .map_err(|e| match CustodyError::from(e) {
                CustodyError::DuplicateError(_) => {
                    CustodyError::DuplicateError(format!("User {} already exists", user_id))
                }
                other => other,
            })?;

        info!("Registered {} {} in {}", role, user_id, org);
        self.events.publish(CustodyEvent::UserRegistered {
            user_id: user_id.to_string(),
            role: role.as_str().to_string(),
            org: org.to_string(),
            timestamp: receipt.timestamp,
        });
        Ok(profile)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserProfile, CustodyError> {
        let (_, profile) = load_user(self.ledger.as_ref(), user_id).await?;
        Ok(profile)
    }

    /// Change display name and/or email. Role and consents are never touched.
    pub async fn update_user(
        &self,
        caller: &CallerContext,
        user_id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<UserProfile, CustodyError> {
        if !caller.is_admin() {
            return Err(CustodyError::access_denied(
                &caller.caller_id,
                "only admins can update users",
            ));
        }
        if name.is_some_and(|n| n.trim().is_empty()) {
            return Err(CustodyError::ValidationError("Name must not be empty".to_string()));
        }

        let (profile, receipt) = update_user(self.ledger.as_ref(), user_id, |profile| {
            let mut changed = false;
            if let Some(name) = name.map(str::trim) {
                if profile.name != name {
                    profile.name = name.to_string();
                    changed = true;
                }
            }
            if let Some(email) = email {
                if profile.email.as_deref() != Some(email) {
                    profile.email = Some(email.to_string());
                    changed = true;
                }
            }
            Ok(changed)
        })
        .await?;

        if receipt.is_some() {
            info!("{} updated profile of {}", caller.caller_id, user_id);
        }
        Ok(profile)
    }

    /// Registered users, optionally restricted to one role, sorted by id.
    pub async fn list_users(&self, role: Option<Role>) -> Result<Vec<UserProfile>, CustodyError> {
        let mut predicate = FieldPredicate::new().eq("docType", USER_DOC_TYPE);
        if let Some(role) = role {
            predicate = predicate.eq("role", role.as_str());
        }

        let mut users: Vec<UserProfile> = self
            .ledger
            .query(&predicate)
            .await?
            .into_iter()
            .filter_map(|snapshot| match snapshot.json::<UserProfile>() {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("Skipping unreadable user {}: {}", snapshot.key, e);
                    None
                }
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingSink;
    use crate::ledger::MemoryLedger;

    fn registry() -> UserRegistry {
        UserRegistry::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(TracingSink),
            RegistrationConfig::default(),
        )
    }

    fn admin(org: &str) -> CallerContext {
        CallerContext::new("admin", Role::Admin, org)
    }

    #[tokio::test]
    async fn test_org_rules() {
        let registry = registry();
        registry
            .register_user(&admin("Org1MSP"), "P1", "Pat", Role::Patient, "Org1MSP")
            .await
            .unwrap();
        registry
            .register_user(&admin("Org2MSP"), "D1", "Doc", Role::Doctor, "Org2MSP")
            .await
            .unwrap();

        assert!(matches!(
            registry
                .register_user(&admin("Org2MSP"), "P2", "Pat", Role::Patient, "Org1MSP")
                .await,
            Err(CustodyError::AuthorizationError(_))
        ));
        assert!(matches!(
            registry
                .register_user(&admin("Org1MSP"), "H1", "Hosp", Role::Hospital, "Org2MSP")
                .await,
            Err(CustodyError::AuthorizationError(_))
        ));
        let doctor = CallerContext::new("D1", Role::Doctor, "Org2MSP");
        assert!(matches!(
            registry
                .register_user(&doctor, "D2", "Doc", Role::Doctor, "Org2MSP")
                .await,
            Err(CustodyError::AuthorizationError(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_and_lookup() {
        let registry = registry();
        let caller = admin("Org1MSP");
        registry
            .register_user(&caller, "P1", "Pat", Role::Patient, "Org1MSP")
            .await
            .unwrap();
        assert!(matches!(
            registry
                .register_user(&caller, "P1", "Again", Role::Patient, "Org1MSP")
                .await,
            Err(CustodyError::DuplicateError(_))
        ));
        assert_eq!(registry.get_user("P1").await.unwrap().name, "Pat");
        assert!(matches!(
            registry.get_user("P9").await,
            Err(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_user_id_cannot_be_reused() {
        let ledger = Arc::new(MemoryLedger::new());
        let registry = UserRegistry::new(
            ledger.clone(),
            Arc::new(TracingSink),
            RegistrationConfig::default(),
        );
        let caller = admin("Org1MSP");
        registry
            .register_user(&caller, "P1", "Pat", Role::Patient, "Org1MSP")
            .await
            .unwrap();
        ledger.delete("P1").await.unwrap();

        assert!(matches!(
            registry
                .register_user(&caller, "P1", "Pat", Role::Patient, "Org1MSP")
                .await,
            Err(CustodyError::DuplicateError(_))
        ));
        assert_eq!(ledger.head_version("P1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_update_and_list() {
        let registry = registry();
        registry
            .register_user(&admin("Org2MSP"), "D2", "Zed", Role::Doctor, "Org2MSP")
            .await
            .unwrap();
        registry
            .register_user(&admin("Org2MSP"), "D1", "Amy", Role::Doctor, "Org2MSP")
            .await
            .unwrap();
        registry
            .register_user(&admin("Org1MSP"), "P1", "Pat", Role::Patient, "Org1MSP")
            .await
            .unwrap();

        let updated = registry
            .update_user(&admin("Org2MSP"), "D1", Some("Amy Lee"), Some("amy@clinic.test"))
            .await
            .unwrap();
        assert_eq!(updated.name, "Amy Lee");
        assert_eq!(updated.role, Role::Doctor);

        let doctors = registry.list_users(Some(Role::Doctor)).await.unwrap();
        let ids: Vec<&str> = doctors.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["D1", "D2"]);
        assert_eq!(registry.list_users(None).await.unwrap().len(), 3);
    }
}
