//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capture::RefreshPolicy;
use crate::pipeline::SyncOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination SQL Server.
    pub target: TargetConfig,

    /// Synchronization behavior.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// SQL Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Default schema for unqualified table names (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// SSL mode (default: "require"). "disable" turns encryption off.
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Synchronization behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Generated columns read back after a merge (default: all).
    #[serde(default = "default_refresh_mode")]
    pub refresh_mode: RefreshPolicy,

    /// First placeholder identity given to unsaved rows (default: -100).
    #[serde(default = "default_identity_seed")]
    pub identity_seed: i64,

    /// Step between placeholder identities (default: -1).
    #[serde(default = "default_identity_increment")]
    pub identity_increment: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_mode: default_refresh_mode(),
            identity_seed: default_identity_seed(),
            identity_increment: default_identity_increment(),
        }
    }
}

impl SyncConfig {
    /// Pipeline options for this configuration.
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            identity_seed: self.identity_seed,
            identity_increment: self.identity_increment,
        }
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_refresh_mode() -> RefreshPolicy {
    RefreshPolicy::All
}

fn default_identity_seed() -> i64 {
    -100
}

fn default_identity_increment() -> i64 {
    -1
}
