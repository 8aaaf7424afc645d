//! Version Ledger - Which migration versions have been applied
//!
//! The ledger is a plain table keyed by version in the target database. It is
//! the only applied-state there is: every migration box on the same
//! connection reads and writes the same rows.

use std::collections::BTreeSet;

use chrono::{NaiveDateTime, Utc};
use tracing::debug;

use super::definitions::{LedgerRecord, Version, MAX_VERSION_LEN};
use crate::backends::{DatabaseConnection, DatabaseValue, ExecutionTarget, SqlDialect};
use crate::config::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};

#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            table: config.ledger_table.clone(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn unavailable(&self, source: MigrationError) -> MigrationError {
        MigrationError::LedgerUnavailable {
            table: self.table.clone(),
            source: Box::new(source),
        }
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version VARCHAR({}) NOT NULL PRIMARY KEY,\n    \
                applied_at {} NOT NULL\n\
            )",
            dialect.quote_identifier(&self.table),
            MAX_VERSION_LEN,
            dialect.timestamp_type()
        )
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure(&self, conn: &dyn DatabaseConnection) -> MigrateResult<()> {
        let sql = self.create_table_sql(conn.dialect());
        conn.execute(&sql, &[]).await.map_err(|e| self.unavailable(e))?;
        Ok(())
    }

    /// Versions currently recorded, read fresh from the database
    pub async fn applied_versions(&self, conn: &dyn DatabaseConnection) -> MigrateResult<BTreeSet<Version>> {
        self.ensure(conn).await?;

        let sql = format!("SELECT version FROM {}", conn.dialect().quote_identifier(&self.table));
        let rows = conn.fetch_all(&sql, &[]).await.map_err(|e| self.unavailable(e))?;

        rows.iter()
            .map(|row| {
                row.required_text("version")
                    .map(Version::new)
                    .map_err(|e| self.unavailable(e))
            })
            .collect()
    }

    /// Full ledger rows ordered by version
    pub async fn records(&self, conn: &dyn DatabaseConnection) -> MigrateResult<Vec<LedgerRecord>> {
        self.ensure(conn).await?;

        let sql = format!(
            "SELECT version, applied_at FROM {} ORDER BY version",
            conn.dialect().quote_identifier(&self.table)
        );
        let rows = conn.fetch_all(&sql, &[]).await.map_err(|e| self.unavailable(e))?;

        rows.iter()
            .map(|row| {
                let version = row.required_text("version")?;
                let applied_at = match row.get_by_name("applied_at") {
                    Some(DatabaseValue::Timestamp(ts)) => *ts,
                    _ => parse_timestamp(&row.required_text("applied_at")?)?,
                };
                Ok(LedgerRecord {
                    version: Version::new(version),
                    applied_at,
                })
            })
            .collect::<MigrateResult<Vec<_>>>()
            .map_err(|e| self.unavailable(e))
    }

    /// Mark `version` applied. Runs on the caller's target so a transactional
    /// migration records itself inside its own transaction.
    pub async fn record(&self, target: &mut ExecutionTarget<'_>, version: &Version) -> MigrateResult<()> {
        let dialect = target.dialect();
        let sql = format!(
            "INSERT INTO {} (version, applied_at) VALUES ({}, {})",
            dialect.quote_identifier(&self.table),
            dialect.parameter_placeholder(0),
            dialect.parameter_placeholder(1)
        );
        let params = [
            DatabaseValue::from(version.as_str()),
            DatabaseValue::Timestamp(Utc::now().naive_utc()),
        ];
        target.execute(&sql, &params).await?;
        debug!(%version, table = %self.table, "recorded migration version");
        Ok(())
    }

    /// Remove the record for `version`
    pub async fn unrecord(&self, target: &mut ExecutionTarget<'_>, version: &Version) -> MigrateResult<()> {
        let dialect = target.dialect();
        let sql = format!(
            "DELETE FROM {} WHERE version = {}",
            dialect.quote_identifier(&self.table),
            dialect.parameter_placeholder(0)
        );
        target.execute(&sql, &[DatabaseValue::from(version.as_str())]).await?;
        debug!(%version, table = %self.table, "removed migration version");
        Ok(())
    }
}

fn parse_timestamp(text: &str) -> MigrateResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| MigrationError::Connection(format!("Invalid ledger timestamp `{}`: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::connect;

    #[test]
    fn test_create_table_sql_per_dialect() {
        let ledger = Ledger::new(&MigrationConfig::default());

        let sqlite = ledger.create_table_sql(SqlDialect::SQLite);
        assert!(sqlite.starts_with("CREATE TABLE IF NOT EXISTS \"schema_migration\""));
        assert!(sqlite.contains("applied_at TIMESTAMP NOT NULL"));

        let mysql = ledger.create_table_sql(SqlDialect::MySQL);
        assert!(mysql.starts_with("CREATE TABLE IF NOT EXISTS `schema_migration`"));
        assert!(mysql.contains("applied_at DATETIME NOT NULL"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2020-01-01 10:11:12").is_ok());
        assert!(parse_timestamp("2020-01-01 10:11:12.123456").is_ok());
        assert!(parse_timestamp("2020-01-01T10:11:12").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_record_and_unrecord() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let ledger = Ledger::new(&MigrationConfig::default());

        assert!(ledger.applied_versions(conn.as_ref()).await.unwrap().is_empty());

        let mut target = ExecutionTarget::Connection(conn.as_ref());
        ledger.record(&mut target, &Version::from("2")).await.unwrap();
        ledger.record(&mut target, &Version::from("1")).await.unwrap();

        let applied = ledger.applied_versions(conn.as_ref()).await.unwrap();
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec![Version::from("1"), Version::from("2")]);

        let records = ledger.records(conn.as_ref()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].version, Version::from("1"));

        ledger.unrecord(&mut target, &Version::from("1")).await.unwrap();
        let applied = ledger.applied_versions(conn.as_ref()).await.unwrap();
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec![Version::from("2")]);
    }

    #[tokio::test]
    async fn test_record_twice_is_rejected() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let ledger = Ledger::new(&MigrationConfig::default());
        ledger.ensure(conn.as_ref()).await.unwrap();

        let mut target = ExecutionTarget::Connection(conn.as_ref());
        ledger.record(&mut target, &Version::from("1")).await.unwrap();
        assert!(ledger.record(&mut target, &Version::from("1")).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_ledger() {
        let conn = connect("sqlite::memory:").await.unwrap();
        conn.execute("CREATE VIEW schema_migration AS SELECT 1 AS other", &[]).await.unwrap();
        let ledger = Ledger::new(&MigrationConfig::default());

        let err = ledger.applied_versions(conn.as_ref()).await.unwrap_err();
        assert!(matches!(err, MigrationError::LedgerUnavailable { .. }));
    }
}
