//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system:
//! versions, directions, migration content and the run/rollback reports.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::backends::{ExecutionTarget, SqlDialect};
use crate::error::MigrateResult;

/// Migration version: the numeric prefix of the identifier.
///
/// Ordered as a plain string so that timestamp-like identifiers sort without
/// integer parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(String);

/// Longest version the ledger column holds
pub const MAX_VERSION_LEN: usize = 48;

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Roll the migration back
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Programmatic migration content.
///
/// The target is the open transaction for transactional migrations and the
/// bare connection otherwise.
#[async_trait]
pub trait MigrationCallback: Send + Sync {
    async fn run(&self, target: &mut ExecutionTarget<'_>) -> MigrateResult<()>;
}

/// What a migration executes
#[derive(Clone)]
pub enum MigrationContent {
    /// Raw SQL, possibly several `;`-separated statements
    Statements(String),
    /// Code operating on the connection or transaction
    Callback(Arc<dyn MigrationCallback>),
}

impl MigrationContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MigrationContent::Statements(sql) => sql.trim().is_empty(),
            MigrationContent::Callback(_) => false,
        }
    }
}

impl fmt::Debug for MigrationContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationContent::Statements(sql) => f.debug_tuple("Statements").field(sql).finish(),
            MigrationContent::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Represents one directional database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Sortable version, shared by the Up and Down halves
    pub version: Version,
    /// Human-readable name
    pub name: String,
    pub direction: Direction,
    /// Restricts the migration to one dialect; `None` applies everywhere
    pub dialect: Option<SqlDialect>,
    pub content: MigrationContent,
    /// Run content and ledger update in one transaction
    pub transactional: bool,
    /// Where the migration came from (file name or label), for diagnostics
    pub identifier: String,
}

impl Migration {
    /// Transactional SQL migration applying to every dialect
    pub fn sql(
        version: impl Into<Version>,
        name: impl Into<String>,
        direction: Direction,
        sql: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let name = name.into();
        let identifier = format!("{}_{}.{}.sql", version, name, direction);
        Self {
            version,
            name,
            direction,
            dialect: None,
            content: MigrationContent::Statements(sql.into()),
            transactional: true,
            identifier,
        }
    }

    /// Transactional programmatic migration applying to every dialect
    pub fn callback(
        version: impl Into<Version>,
        name: impl Into<String>,
        direction: Direction,
        callback: impl MigrationCallback + 'static,
    ) -> Self {
        let version = version.into();
        let name = name.into();
        let identifier = format!("{}_{}.{} (callback)", version, name, direction);
        Self {
            version,
            name,
            direction,
            dialect: None,
            content: MigrationContent::Callback(Arc::new(callback)),
            transactional: true,
            identifier,
        }
    }

    pub fn for_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Run outside a transaction (autocommit)
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Empty Down counterpart, used to unrecord a version that has no Down migration
    pub(crate) fn empty_down(up: &Migration) -> Self {
        Self {
            version: up.version.clone(),
            name: up.name.clone(),
            direction: Direction::Down,
            dialect: up.dialect,
            content: MigrationContent::Statements(String::new()),
            transactional: true,
            identifier: format!("{}_{}.down (implicit)", up.version, up.name),
        }
    }

    pub fn applies_to(&self, dialect: SqlDialect) -> bool {
        self.dialect.map_or(true, |d| d == dialect)
    }
}

/// Persisted ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub version: Version,
    pub applied_at: NaiveDateTime,
}

/// Whether an Up migration has been recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applied,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "Pending",
            MigrationState::Applied => "Applied",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one Up migration at the time it was read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: Version,
    pub name: String,
    pub state: MigrationState,
}

/// Result of running migrations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Versions applied by this call, in order
    pub applied_migrations: Vec<Version>,
    /// Number of migrations that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied_migrations.len()
    }
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackResult {
    /// Versions rolled back by this call, newest first
    pub rolled_back_migrations: Vec<Version>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RollbackResult {
    pub fn rolled_back_count(&self) -> usize {
        self.rolled_back_migrations.len()
    }
}
