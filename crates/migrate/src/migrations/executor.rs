//! Migration Executor - Runs one migration and keeps the ledger in step
//!
//! Transactional migrations run their content and the ledger write in a single
//! transaction on dialects with transactional DDL. Everything else runs
//! directly on the connection, content first, ledger second.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::definitions::{Direction, Migration, MigrationContent};
use super::ledger::Ledger;
use super::statements::split_statements;
use crate::backends::{DatabaseConnection, ExecutionTarget};
use crate::error::{MigrateResult, MigrationError};

#[derive(Debug, Clone)]
pub struct Executor {
    ledger: Ledger,
}

impl Executor {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply `migration` in its direction and record (Up) or unrecord (Down) its version
    pub async fn apply(&self, migration: &Migration, conn: &dyn DatabaseConnection) -> MigrateResult<()> {
        let dialect = conn.dialect();
        let start = Instant::now();

        if migration.transactional && !dialect.supports_transactional_ddl() {
            debug!(
                version = %migration.version,
                %dialect,
                "dialect has no transactional DDL, running migration without a transaction"
            );
        }

        if migration.transactional && dialect.supports_transactional_ddl() {
            self.apply_in_transaction(migration, conn).await?;
        } else {
            self.apply_autocommit(migration, conn).await?;
        }

        info!(
            version = %migration.version,
            name = %migration.name,
            direction = %migration.direction,
            elapsed_ms = start.elapsed().as_millis(),
            "migration applied"
        );
        Ok(())
    }

    async fn apply_in_transaction(&self, migration: &Migration, conn: &dyn DatabaseConnection) -> MigrateResult<()> {
        let failed = |cause: MigrationError| MigrationError::Execution {
            version: migration.version.to_string(),
            cause: Box::new(cause),
        };

        let mut tx = conn.begin_transaction().await.map_err(failed)?;

        let outcome = {
            let mut target = ExecutionTarget::Transaction(tx.as_mut());
            match run_content(migration, &mut target).await {
                Ok(()) => self.write_ledger(migration, &mut target).await,
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(()) => tx.commit().await.map_err(failed),
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        version = %migration.version,
                        error = %rollback_error,
                        "rollback after failed migration also failed"
                    );
                }
                Err(failed(e))
            }
        }
    }

    async fn apply_autocommit(&self, migration: &Migration, conn: &dyn DatabaseConnection) -> MigrateResult<()> {
        let mut target = ExecutionTarget::Connection(conn);

        run_content(migration, &mut target)
            .await
            .map_err(|cause| MigrationError::Execution {
                version: migration.version.to_string(),
                cause: Box::new(cause),
            })?;

        self.write_ledger(migration, &mut target).await.map_err(|cause| {
            warn!(
                version = %migration.version,
                error = %cause,
                "migration ran outside a transaction but the ledger write failed"
            );
            MigrationError::LedgerInconsistency {
                version: migration.version.to_string(),
                cause: Box::new(cause),
            }
        })
    }

    async fn write_ledger(&self, migration: &Migration, target: &mut ExecutionTarget<'_>) -> MigrateResult<()> {
        match migration.direction {
            Direction::Up => self.ledger.record(target, &migration.version).await,
            Direction::Down => self.ledger.unrecord(target, &migration.version).await,
        }
    }
}

async fn run_content(migration: &Migration, target: &mut ExecutionTarget<'_>) -> MigrateResult<()> {
    match &migration.content {
        MigrationContent::Statements(sql) => {
            for statement in split_statements(sql, target.dialect()) {
                debug!(version = %migration.version, %statement, "executing migration statement");
                target.execute(&statement, &[]).await?;
            }
            Ok(())
        }
        MigrationContent::Callback(callback) => callback.run(target).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::backends::{connect, DatabaseValue};
    use crate::config::MigrationConfig;
    use crate::migrations::definitions::MigrationCallback;

    fn executor() -> Executor {
        Executor::new(Ledger::new(&MigrationConfig::default()))
    }

    async fn table_exists(conn: &dyn DatabaseConnection, table: &str) -> bool {
        let rows = conn
            .fetch_all(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[DatabaseValue::from(table)],
            )
            .await
            .unwrap();
        !rows.is_empty()
    }

    #[tokio::test]
    async fn test_apply_up_records_version() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let up = Migration::sql("1", "notes", Direction::Up, "CREATE TABLE notes (id INTEGER PRIMARY KEY);");
        executor.apply(&up, conn.as_ref()).await.unwrap();

        assert!(table_exists(conn.as_ref(), "notes").await);
        let applied = executor.ledger().applied_versions(conn.as_ref()).await.unwrap();
        assert!(applied.contains(&up.version));

        let down = Migration::sql("1", "notes", Direction::Down, "DROP TABLE notes;");
        executor.apply(&down, conn.as_ref()).await.unwrap();

        assert!(!table_exists(conn.as_ref(), "notes").await);
        assert!(executor.ledger().applied_versions(conn.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transactional_migration_rolls_back() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let up = Migration::sql(
            "1",
            "broken",
            Direction::Up,
            "CREATE TABLE notes (id INTEGER PRIMARY KEY);\nINSERT INTO missing_table VALUES (1);",
        );
        let err = executor.apply(&up, conn.as_ref()).await.unwrap_err();

        assert!(matches!(err, MigrationError::Execution { ref version, .. } if version == "1"));
        assert!(!table_exists(conn.as_ref(), "notes").await);
        assert!(executor.ledger().applied_versions(conn.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_autocommit_keeps_partial_work() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let up = Migration::sql(
            "1",
            "broken",
            Direction::Up,
            "CREATE TABLE notes (id INTEGER PRIMARY KEY);\nINSERT INTO missing_table VALUES (1);",
        )
        .non_transactional();
        let err = executor.apply(&up, conn.as_ref()).await.unwrap_err();

        assert!(matches!(err, MigrationError::Execution { .. }));
        assert!(table_exists(conn.as_ref(), "notes").await);
        assert!(executor.ledger().applied_versions(conn.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_autocommit_ledger_failure_is_inconsistency() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let up = Migration::sql("1", "drop_ledger", Direction::Up, "DROP TABLE schema_migration;")
            .non_transactional();
        let err = executor.apply(&up, conn.as_ref()).await.unwrap_err();

        assert!(matches!(err, MigrationError::LedgerInconsistency { ref version, .. } if version == "1"));
    }

    struct Probe {
        saw_transaction: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MigrationCallback for Probe {
        async fn run(&self, target: &mut ExecutionTarget<'_>) -> MigrateResult<()> {
            self.saw_transaction.store(target.is_transactional(), Ordering::SeqCst);
            target.execute("CREATE TABLE probes (id INTEGER)", &[]).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_callback_receives_transaction() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let saw_transaction = Arc::new(AtomicBool::new(false));
        let up = Migration::callback(
            "1",
            "probe",
            Direction::Up,
            Probe {
                saw_transaction: saw_transaction.clone(),
            },
        );
        executor.apply(&up, conn.as_ref()).await.unwrap();

        assert!(saw_transaction.load(Ordering::SeqCst));
        assert!(table_exists(conn.as_ref(), "probes").await);
    }

    struct Failing;

    #[async_trait]
    impl MigrationCallback for Failing {
        async fn run(&self, target: &mut ExecutionTarget<'_>) -> MigrateResult<()> {
            target.execute("CREATE TABLE half_done (id INTEGER)", &[]).await?;
            Err(MigrationError::content("refusing to continue"))
        }
    }

    #[tokio::test]
    async fn test_failing_callback_rolls_back() {
        let conn = connect("sqlite::memory:").await.unwrap();
        let executor = executor();
        executor.ledger().ensure(conn.as_ref()).await.unwrap();

        let up = Migration::callback("1", "failing", Direction::Up, Failing);
        let err = executor.apply(&up, conn.as_ref()).await.unwrap_err();

        match err {
            MigrationError::Execution { cause, .. } => {
                assert!(matches!(*cause, MigrationError::Content(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!table_exists(conn.as_ref(), "half_done").await);
    }
}
