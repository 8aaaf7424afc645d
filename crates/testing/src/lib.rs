//! # schemabox-testing - Test support for schemabox
//!
//! Utilities shared by the integration tests of `schemabox-migrate`:
//!
//! - **Databases**: fresh SQLite in-memory connections, plus PostgreSQL,
//!   MySQL and CockroachDB databases picked up from `TEST_POSTGRES_URL`,
//!   `TEST_MYSQL_URL` and `TEST_COCKROACH_URL` when they are set
//! - **Migration directories**: temporary directories populated with
//!   migration files or copied from fixtures
//! - **Tracing**: a test-writer subscriber filtered by `RUST_LOG`
//!
//! ```rust,no_run
//! use schemabox_testing::prelude::*;
//!
//! # async fn run() -> TestResult<()> {
//! init_tracing();
//! let db = TestDatabase::sqlite().await?;
//! let dir = TempMigrations::new()?.with_file("1_notes.up.sql", "CREATE TABLE notes (id INTEGER);")?;
//! let migration_box = MigrationBox::new(db.connection(), &dir.source())?;
//! migration_box.up().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;

pub use database::TestDatabase;
pub use migrations::TempMigrations;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{database::TestDatabase, init_tracing, migrations::TempMigrations, utils, TestError, TestResult};

    pub use schemabox_migrate::{MigrationBox, MigrationError, SqlDialect};
}

// Error handling
#[derive(thiserror::Error, Debug)]
pub enum TestError {
    #[error("Migration error: {0}")]
    Migration(#[from] schemabox_migrate::MigrationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Test setup error: {0}")]
    Setup(String),
}

pub type TestResult<T> = Result<T, TestError>;

/// Install a `tracing` subscriber that writes through the test harness.
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schemabox_migrate=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Test utilities and helper functions
pub mod utils {

    /// Generate a random test string with optional prefix
    pub fn random_string(prefix: Option<&str>) -> String {
        use rand::Rng;
        let suffix: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();

        match prefix {
            Some(p) => format!("{}_{}", p, suffix),
            None => suffix,
        }
    }

    /// Random name usable as an unquoted SQL identifier
    pub fn random_table_name() -> String {
        random_string(Some("t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let plain = utils::random_string(None);
        assert_eq!(plain.len(), 8);

        let prefixed = utils::random_string(Some("ledger"));
        assert!(prefixed.starts_with("ledger_"));
        assert_ne!(utils::random_string(None), utils::random_string(None));
    }

    #[test]
    fn test_random_table_name_is_identifier() {
        let name = utils::random_table_name();
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
