//! Error types for the migration engine
//!
//! Source-time errors (malformed identifiers, duplicate versions), ledger and
//! execution errors, and the collaborator errors they wrap.

use std::path::PathBuf;

use crate::migrations::definitions::Direction;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A migration unit could not be parsed into (version, name, direction)
    #[error("Malformed migration `{identifier}`: {reason}")]
    MalformedMigration { identifier: String, reason: String },

    /// Two units of equal specificity share a (version, direction) pair
    #[error("Duplicate {direction} migration for version {version}: `{first}` and `{second}`")]
    DuplicateVersion {
        version: String,
        direction: Direction,
        first: String,
        second: String,
    },

    /// The ledger table could not be created or read
    #[error("Migration ledger `{table}` is unavailable: {source}")]
    LedgerUnavailable {
        table: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// Migration content failed; nothing was recorded
    #[error("Migration {version} failed: {cause}")]
    Execution {
        version: String,
        #[source]
        cause: Box<MigrationError>,
    },

    /// Content ran outside a transaction but the ledger write failed afterwards
    #[error("Migration {version} changed the schema but the ledger could not be updated: {cause}")]
    LedgerInconsistency {
        version: String,
        #[source]
        cause: Box<MigrationError>,
    },

    /// Failure raised by a programmatic migration
    #[error("Migration content error: {0}")]
    Content(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read migrations from `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode schema fingerprint: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write status report: {0}")]
    Report(#[from] std::io::Error),
}

impl MigrationError {
    pub fn malformed(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::MalformedMigration {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn content(message: impl Into<String>) -> Self {
        MigrationError::Content(message.into())
    }

    /// Version the error is attached to, for execution-time failures
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::Execution { version, .. }
            | MigrationError::LedgerInconsistency { version, .. }
            | MigrationError::DuplicateVersion { version, .. } => Some(version),
            _ => None,
        }
    }
}
