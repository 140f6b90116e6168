//! Runtime configuration for the custody node.

pub mod loader;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server_id: String,
    pub database_url: String,
    pub blob_dir: String,
    /// AES-256 key, 64 hex characters. Issued and rotated outside this crate.
    pub cipher_key_hex: String,
    pub ledger: LedgerConfig,
    pub registration: RegistrationConfig,
    pub records: RecordLimits,
    pub access_log: AccessLogConfig,
    pub events: EventConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Timestamp assigned to commit sequence zero.
    pub genesis: DateTime<Utc>,
    /// Logical clock advance per commit.
    pub tick_millis: i64,
    pub history_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Org whose admins may register patients.
    pub patient_org: String,
    /// Org whose admins may register doctors and hospitals.
    pub provider_org: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLimits {
    pub max_document_bytes: usize,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub failure_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_id: "custody-01".to_string(),
            database_url: "sqlite://medchain.db".to_string(),
            blob_dir: "./data/blobs".to_string(),
            cipher_key_hex: String::new(),
            ledger: LedgerConfig::default(),
            registration: RegistrationConfig::default(),
            records: RecordLimits::default(),
            access_log: AccessLogConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            genesis: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            tick_millis: 1_000,
            history_page_size: 64,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            patient_org: "Org1MSP".to_string(),
            provider_org: "Org2MSP".to_string(),
        }
    }
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: 64 * 1024 * 1024,
            max_payload_bytes: 64 * 1024,
        }
    }
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
            max_attempts: 5,
            retry_backoff_ms: 200,
            failure_channel_capacity: 256,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
