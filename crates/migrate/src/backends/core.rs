//! Core Database Backend Traits
//!
//! The narrow connection interface the engine consumes: statement execution,
//! row fetching and transactions, parameterized by SQL dialect. Each backend
//! module implements these traits on top of a sqlx pool.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{MigrateResult, MigrationError};

/// SQL dialects the engine knows how to migrate and fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SqlDialect {
    SQLite,
    PostgreSQL,
    MySQL,
    CockroachDB,
}

impl SqlDialect {
    /// Canonical tag used in migration identifiers and fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::SQLite => "sqlite",
            SqlDialect::PostgreSQL => "postgres",
            SqlDialect::MySQL => "mysql",
            SqlDialect::CockroachDB => "cockroach",
        }
    }

    /// Parse a dialect tag, accepting the common aliases
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(SqlDialect::SQLite),
            "postgres" | "postgresql" => Some(SqlDialect::PostgreSQL),
            "mysql" => Some(SqlDialect::MySQL),
            "cockroach" | "cockroachdb" => Some(SqlDialect::CockroachDB),
            _ => None,
        }
    }

    /// Whether DDL can run inside a transaction and be rolled back with it.
    /// MySQL commits implicitly on most DDL statements.
    pub fn supports_transactional_ddl(&self) -> bool {
        match self {
            SqlDialect::SQLite | SqlDialect::PostgreSQL | SqlDialect::CockroachDB => true,
            SqlDialect::MySQL => false,
        }
    }

    /// Get the parameter placeholder style for this dialect (zero-based index)
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::MySQL => '`',
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB | SqlDialect::SQLite => '"',
        }
    }

    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        format!("{quote}{identifier}{quote}")
    }

    /// Column type used for timestamps written by the engine
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::MySQL => "DATETIME",
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB | SqlDialect::SQLite => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SqlDialect::from_tag(s)
            .ok_or_else(|| MigrationError::Connection(format!("Unsupported database dialect: {}", s)))
    }
}

/// Database value enumeration for parameter binding and row decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Textual rendering used by catalog readers; `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            DatabaseValue::Null => None,
            DatabaseValue::Bool(b) => Some(b.to_string()),
            DatabaseValue::Int64(i) => Some(i.to_string()),
            DatabaseValue::Float64(f) => Some(f.to_string()),
            DatabaseValue::String(s) => Some(s.clone()),
            DatabaseValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            DatabaseValue::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A decoded result row, detached from the driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    /// Column lookup is case-insensitive; MySQL reports catalog columns in upper case.
    pub fn get_by_name(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .and_then(|index| self.values.get(index))
    }

    /// Text value of a column, `None` when the column is NULL
    pub fn text(&self, name: &str) -> MigrateResult<Option<String>> {
        self.get_by_name(name)
            .map(DatabaseValue::as_text)
            .ok_or_else(|| MigrationError::Connection(format!("Column '{}' not found", name)))
    }

    /// Text value of a column that must not be NULL
    pub fn required_text(&self, name: &str) -> MigrateResult<String> {
        self.text(name)?
            .ok_or_else(|| MigrationError::Connection(format!("Column '{}' is unexpectedly NULL", name)))
    }
}

/// Abstract database connection trait
///
/// Implementations are shared between migration boxes, so every method takes
/// `&self`. A SQLite in-memory connection must keep exactly one underlying
/// connection alive for its whole lifetime.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Get the SQL dialect spoken by this connection
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement and return the affected rows count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> MigrateResult<Box<dyn DatabaseTransaction>>;

    /// Close the connection
    async fn close(&self) -> MigrateResult<()>;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: Send {
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// Where migration content and ledger writes run: directly on the connection,
/// or inside an open transaction.
pub enum ExecutionTarget<'a> {
    Connection(&'a dyn DatabaseConnection),
    Transaction(&'a mut dyn DatabaseTransaction),
}

impl<'a> ExecutionTarget<'a> {
    pub fn dialect(&self) -> SqlDialect {
        match self {
            ExecutionTarget::Connection(conn) => conn.dialect(),
            ExecutionTarget::Transaction(tx) => tx.dialect(),
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, ExecutionTarget::Transaction(_))
    }

    pub async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        match self {
            ExecutionTarget::Connection(conn) => conn.execute(sql, params).await,
            ExecutionTarget::Transaction(tx) => tx.execute(sql, params).await,
        }
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>> {
        match self {
            ExecutionTarget::Connection(conn) => conn.fetch_all(sql, params).await,
            ExecutionTarget::Transaction(tx) => tx.fetch_all(sql, params).await,
        }
    }
}
