//! Configuration for the migration engine and its database connections
//!
//! Both structs have defaults and can be loaded from the environment.

use std::env;
use std::time::Duration;

use crate::error::{MigrateResult, MigrationError};

pub const DEFAULT_LEDGER_TABLE: &str = "schema_migration";

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Table name for tracking applied migrations
    pub ledger_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl MigrationConfig {
    pub fn new(ledger_table: impl Into<String>) -> MigrateResult<Self> {
        let config = Self {
            ledger_table: ledger_table.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `SCHEMABOX_LEDGER_TABLE`, falling back to the defaults
    pub fn from_env() -> MigrateResult<Self> {
        match env::var("SCHEMABOX_LEDGER_TABLE") {
            Ok(table) => Self::new(table),
            Err(_) => Ok(Self::default()),
        }
    }

    /// The ledger table name is interpolated into SQL, so it must be a plain identifier
    pub fn validate(&self) -> MigrateResult<()> {
        let table = &self.ledger_table;
        let valid = !table.is_empty()
            && table.len() <= 63
            && table.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid {
            Ok(())
        } else {
            Err(MigrationError::Configuration(format!(
                "Ledger table name `{}` must be a plain SQL identifier",
                table
            )))
        }
    }
}

/// Connection settings handed to the backend that matches the URL scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Load from `DATABASE_URL`, `SCHEMABOX_MAX_CONNECTIONS` and
    /// `SCHEMABOX_ACQUIRE_TIMEOUT_SECS`
    pub fn from_env() -> MigrateResult<Self> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| MigrationError::Configuration("DATABASE_URL is not set".to_string()))?;
        let mut config = Self::new(url);

        if let Ok(max) = env::var("SCHEMABOX_MAX_CONNECTIONS") {
            config.max_connections = max.parse().map_err(|_| {
                MigrationError::Configuration(format!("Invalid SCHEMABOX_MAX_CONNECTIONS: {}", max))
            })?;
        }

        if let Ok(secs) = env::var("SCHEMABOX_ACQUIRE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                MigrationError::Configuration(format!("Invalid SCHEMABOX_ACQUIRE_TIMEOUT_SECS: {}", secs))
            })?;
            config.acquire_timeout = Duration::from_secs(secs);
        }

        if config.max_connections == 0 {
            return Err(MigrationError::Configuration(
                "SCHEMABOX_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }
}
