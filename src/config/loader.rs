//! Configuration loader
//!
//! Layers built-in defaults, an optional TOML file and `MEDCHAIN__*`
//! environment variables, then validates the result.

use config::{Config, Environment, File};
use std::path::Path;
use tracing::info;

use super::AppConfig;
use crate::error::CustodyError;

impl AppConfig {
    /// Load configuration. Environment wins over the file, the file wins over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CustodyError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            info!("Loading custody configuration from: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix("MEDCHAIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!("Configuration loaded for server {}", config.server_id);
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), CustodyError> {
        self.cipher_key()?;

        if self.ledger.tick_millis <= 0 {
            return Err(CustodyError::ConfigError(format!(
                "ledger.tick_millis ({}) must be positive",
                self.ledger.tick_millis
            )));
        }

        if self.ledger.history_page_size == 0 {
            return Err(CustodyError::ConfigError(
                "ledger.history_page_size must be at least 1".to_string(),
            ));
        }

        if self.access_log.queue_capacity == 0 || self.access_log.failure_channel_capacity == 0 {
            return Err(CustodyError::ConfigError(
                "access_log capacities must be at least 1".to_string(),
            ));
        }

        if self.access_log.max_attempts == 0 {
            return Err(CustodyError::ConfigError(
                "access_log.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(CustodyError::ConfigError(
                "events.channel_capacity must be at least 1".to_string(),
            ));
        }

        if self.registration.patient_org.is_empty() || self.registration.provider_org.is_empty() {
            return Err(CustodyError::ConfigError(
                "registration orgs must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Decode the blob cipher key.
    pub fn cipher_key(&self) -> Result<[u8; 32], CustodyError> {
        let bytes = hex::decode(self.cipher_key_hex.trim()).map_err(|e| {
            CustodyError::ConfigError(format!("cipher_key_hex is not valid hex: {}", e))
        })?;

        bytes.try_into().map_err(|_| {
            CustodyError::ConfigError("cipher_key_hex must decode to exactly 32 bytes".to_string())
        })
    }
}
