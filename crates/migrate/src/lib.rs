//! # schemabox-migrate: Versioned Schema Migrations
//!
//! Applies ordered, versioned migrations to SQLite, PostgreSQL, MySQL and
//! CockroachDB databases and tracks them in a ledger table. Transactional
//! migrations run content and ledger write atomically wherever the dialect
//! supports transactional DDL.
//!
//! Schema fingerprints make it possible to check that two differently
//! organized migration sets bring a database to the same schema.
//!
//! ```no_run
//! use schemabox_migrate::{connect, DirectorySource, MigrationBox};
//!
//! # async fn run() -> schemabox_migrate::MigrateResult<()> {
//! let conn = connect("sqlite://app.db").await?;
//! let migration_box = MigrationBox::new(conn, &DirectorySource::new("migrations"))?;
//!
//! migration_box.up().await?;
//! migration_box.write_status(&mut std::io::stdout()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;
pub mod schema;

// Re-export core traits and types
pub use backends::{
    connect, connect_with, detect_dialect, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue,
    ExecutionTarget, SqlDialect,
};
pub use config::{ConnectionConfig, MigrationConfig, DEFAULT_LEDGER_TABLE};
pub use error::{MigrateResult, MigrationError};
pub use migrations::*;
pub use schema::{Fingerprinter, SchemaFingerprint, SchemaSnapshot};
