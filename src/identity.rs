//! Identity Context
//!
//! Authenticated caller claims supplied by the enclosing transport layer.
//! Claims are trusted as given; no signature verification happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CustodyError;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Roles a registered user can hold. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Hospital,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Hospital => "hospital",
            Role::Admin => "admin",
        }
    }

    /// Doctors and hospitals are the only roles a patient can consent to.
    pub fn is_provider(&self) -> bool {
        matches!(self, Role::Doctor | Role::Hospital)
    }
}

impl FromStr for Role {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "hospital" => Ok(Role::Hospital),
            "admin" => Ok(Role::Admin),
            _ => Err(CustodyError::ValidationError(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (callerId, callerRole, callerOrg) as asserted by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub caller_id: String,
    pub role: Role,
    pub org: String,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>, role: Role, org: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            role,
            org: org.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Ledger keys and user ids share one namespace, so every id goes through the
/// same rules: non-empty, bounded, printable, no whitespace.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), CustodyError> {
    if value.is_empty()
        || value.len() > MAX_IDENTIFIER_LEN
        || value.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CustodyError::invalid_identifier(field, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("hospital".parse::<Role>().unwrap(), Role::Hospital);
        assert!("nurse".parse::<Role>().is_err());
        assert!(Role::Hospital.is_provider());
        assert!(!Role::Patient.is_provider());
        assert!(!Role::Admin.is_provider());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("recordId", "REC-2026-001").is_ok());
        assert!(validate_identifier("recordId", "").is_err());
        assert!(validate_identifier("recordId", "has space").is_err());
        assert!(validate_identifier("recordId", &"x".repeat(129)).is_err());
    }
}
