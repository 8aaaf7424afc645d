//! Database testing utilities
//!
//! SQLite in-memory databases are always available. External databases are
//! opt-in through environment variables, one per dialect:
//!
//! - `TEST_POSTGRES_URL`
//! - `TEST_MYSQL_URL`
//! - `TEST_COCKROACH_URL`
//!
//! External databases are shared between test runs, so [`TestDatabase::reset`]
//! drops every table before a test uses one.

use std::sync::Arc;

use schemabox_migrate::{connect, connect_with, ConnectionConfig, DatabaseConnection, DatabaseValue, SqlDialect};
use tracing::info;

use crate::{TestError, TestResult};

/// A connection provisioned for one test
#[derive(Clone)]
pub struct TestDatabase {
    conn: Arc<dyn DatabaseConnection>,
}

impl TestDatabase {
    /// A private in-memory SQLite database
    pub async fn sqlite() -> TestResult<Self> {
        let conn = connect("sqlite::memory:").await?;
        Ok(Self { conn })
    }

    pub fn env_var(dialect: SqlDialect) -> Option<&'static str> {
        match dialect {
            SqlDialect::SQLite => None,
            SqlDialect::PostgreSQL => Some("TEST_POSTGRES_URL"),
            SqlDialect::MySQL => Some("TEST_MYSQL_URL"),
            SqlDialect::CockroachDB => Some("TEST_COCKROACH_URL"),
        }
    }

    /// The external database configured for `dialect`, emptied, or `None` when
    /// its environment variable is not set
    pub async fn from_env(dialect: SqlDialect) -> TestResult<Option<Self>> {
        let Some(var) = Self::env_var(dialect) else {
            return Self::sqlite().await.map(Some);
        };
        let url = match std::env::var(var) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                info!(%dialect, "{} is not set, skipping", var);
                return Ok(None);
            }
        };

        let conn = connect_with(ConnectionConfig::new(url).with_max_connections(2)).await?;
        if conn.dialect() != dialect {
            return Err(TestError::Setup(format!(
                "{} points at a {} database, expected {}",
                var,
                conn.dialect(),
                dialect
            )));
        }

        let db = Self { conn };
        db.reset().await?;
        Ok(Some(db))
    }

    /// A fresh SQLite database plus every configured external database
    pub async fn all() -> TestResult<Vec<Self>> {
        let mut databases = vec![Self::sqlite().await?];
        for dialect in [SqlDialect::PostgreSQL, SqlDialect::MySQL, SqlDialect::CockroachDB] {
            if let Some(db) = Self::from_env(dialect).await? {
                databases.push(db);
            }
        }
        Ok(databases)
    }

    pub fn connection(&self) -> Arc<dyn DatabaseConnection> {
        self.conn.clone()
    }

    pub fn dialect(&self) -> SqlDialect {
        self.conn.dialect()
    }

    /// Execute a raw SQL statement (for test setup)
    pub async fn execute(&self, sql: &str) -> TestResult<()> {
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }

    /// Names of the tables in the current schema, sorted
    pub async fn tables(&self) -> TestResult<Vec<String>> {
        let sql = match self.dialect() {
            SqlDialect::SQLite => {
                "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            }
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB => {
                "SELECT table_name::text AS table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'"
            }
            SqlDialect::MySQL => {
                "SELECT TABLE_NAME AS table_name FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'"
            }
        };

        let mut tables = self
            .conn
            .fetch_all(sql, &[])
            .await?
            .iter()
            .map(|row| row.required_text("table_name"))
            .collect::<Result<Vec<_>, _>>()?;
        tables.sort();
        Ok(tables)
    }

    pub async fn table_exists(&self, table: &str) -> TestResult<bool> {
        Ok(self.tables().await?.iter().any(|name| name.eq_ignore_ascii_case(table)))
    }

    /// Count rows in `table`
    pub async fn count_rows(&self, table: &str) -> TestResult<i64> {
        let sql = format!("SELECT COUNT(*) AS row_count FROM {}", self.dialect().quote_identifier(table));
        let rows = self.conn.fetch_all(&sql, &[]).await?;
        match rows.first().and_then(|row| row.get_by_name("row_count")) {
            Some(DatabaseValue::Int64(count)) => Ok(*count),
            Some(other) => other
                .as_text()
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| TestError::Setup(format!("Unexpected row count for {}: {:?}", table, other))),
            None => Err(TestError::Setup(format!("No row count returned for {}", table))),
        }
    }

    /// Drop every table in the current schema
    pub async fn reset(&self) -> TestResult<()> {
        let tables = self.tables().await?;
        if tables.is_empty() {
            return Ok(());
        }

        let dialect = self.dialect();
        let quoted = tables
            .iter()
            .map(|table| dialect.quote_identifier(table))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = match dialect {
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB => format!("DROP TABLE IF EXISTS {} CASCADE", quoted),
            SqlDialect::MySQL => format!("DROP TABLE IF EXISTS {}", quoted),
            // SQLite drops one table per statement; foreign keys are switched off meanwhile
            SqlDialect::SQLite => {
                self.execute("PRAGMA foreign_keys = OFF").await?;
                for table in &tables {
                    self.execute(&format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(table)))
                        .await?;
                }
                self.execute("PRAGMA foreign_keys = ON").await?;
                return Ok(());
            }
        };
        self.execute(&sql).await
    }

    pub async fn close(self) -> TestResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_database_is_private() {
        let first = TestDatabase::sqlite().await.unwrap();
        let second = TestDatabase::sqlite().await.unwrap();

        first.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY)").await.unwrap();

        assert!(first.table_exists("notes").await.unwrap());
        assert!(!second.table_exists("notes").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_and_reset() {
        let db = TestDatabase::sqlite().await.unwrap();
        db.execute("CREATE TABLE parents (id INTEGER PRIMARY KEY)").await.unwrap();
        db.execute("CREATE TABLE children (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parents (id))")
            .await
            .unwrap();
        db.execute("INSERT INTO parents (id) VALUES (1), (2)").await.unwrap();

        assert_eq!(db.count_rows("parents").await.unwrap(), 2);
        assert_eq!(db.tables().await.unwrap(), vec!["children", "parents"]);

        db.reset().await.unwrap();
        assert!(db.tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_includes_sqlite() {
        let databases = TestDatabase::all().await.unwrap();
        assert_eq!(databases[0].dialect(), SqlDialect::SQLite);
    }
}
