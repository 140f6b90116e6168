use thiserror::Error;

use crate::blob::BlobError;
use crate::ledger::LedgerError;

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationError(format!("JSON serialization error: {}", err))
    }
}

impl From<LedgerError> for CustodyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(key) => Self::NotFound(key),
            LedgerError::AlreadyExists(key) => Self::DuplicateError(key),
            other => Self::LedgerError(other.to_string()),
        }
    }
}

impl From<BlobError> for CustodyError {
    fn from(err: BlobError) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<config::ConfigError> for CustodyError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authorization denied: {0}")]
    AuthorizationError(String),

    #[error("Duplicate: {0}")]
    DuplicateError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error taxonomy shared by every custody operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authz,
    Duplicate,
    Storage,
    Ledger,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Authz => "AUTHZ",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Ledger => "LEDGER_ERROR",
            ErrorKind::Config => "CONFIG",
        }
    }
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::ValidationError(_) => ErrorKind::Validation,
            CustodyError::NotFound(_) => ErrorKind::NotFound,
            CustodyError::AuthorizationError(_) => ErrorKind::Authz,
            CustodyError::DuplicateError(_) => ErrorKind::Duplicate,
            CustodyError::StorageError(_) => ErrorKind::Storage,
            CustodyError::LedgerError(_) => ErrorKind::Ledger,
            CustodyError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Substrate failures may succeed on resubmission (with a fresh record id).
    /// Everything else is a local, deterministic rejection.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Ledger)
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound(format!("{} {} does not exist", what, id))
    }

    pub fn access_denied(caller: &str, reason: &str) -> Self {
        Self::AuthorizationError(format!("{}: {}", caller, reason))
    }

    pub fn invalid_identifier(field: &str, value: &str) -> Self {
        Self::ValidationError(format!("Invalid {}: {:?}", field, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_retriable() {
        assert_eq!(
            CustodyError::not_found("Record", "R1").kind(),
            ErrorKind::NotFound
        );
        assert!(!CustodyError::access_denied("D1", "no consent").is_retriable());
        assert!(CustodyError::StorageError("disk".to_string()).is_retriable());
        assert!(CustodyError::LedgerError("busy".to_string()).is_retriable());
        assert_eq!(ErrorKind::Authz.as_str(), "AUTHZ");
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: CustodyError = LedgerError::Storage("locked".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Ledger);
        assert!(err.to_string().contains("locked"));
    }
}
