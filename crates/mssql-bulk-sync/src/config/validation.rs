//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.target.host.is_empty() {
        return Err(SyncError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(SyncError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(SyncError::Config("target.user is required".into()));
    }
    if config.target.port == 0 {
        return Err(SyncError::Config("target.port must be non-zero".into()));
    }
    validate_identifier(&config.target.schema)
        .map_err(|e| SyncError::Config(format!("target.schema: {}", e)))?;

    match config.target.ssl_mode.to_lowercase().as_str() {
        "disable" | "require" => {}
        other => {
            return Err(SyncError::Config(format!(
                "target.ssl_mode must be 'disable' or 'require', got '{}'",
                other
            )))
        }
    }

    // Placeholders must stay clear of real (positive) identities
    if config.sync.identity_seed >= 0 {
        return Err(SyncError::Config(format!(
            "sync.identity_seed must be negative, got {}",
            config.sync.identity_seed
        )));
    }
    if config.sync.identity_increment >= 0 {
        return Err(SyncError::Config(format!(
            "sync.identity_increment must be negative, got {}",
            config.sync.identity_increment
        )));
    }

    Ok(())
}
