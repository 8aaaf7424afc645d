//! Migration Box - Binds one migration set to one connection
//!
//! The box sequences Up and Down migrations through the executor and reports
//! status from the ledger. It keeps no applied-state of its own: the ledger
//! table is re-read on every operation, so boxes built against the same
//! connection always agree.
//!
//! Boxes sharing a connection must not run `up`/`down` concurrently. Nothing
//! here enforces that; serializing those calls is up to the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::definitions::{
    Direction, Migration, MigrationRunResult, MigrationState, MigrationStatus, RollbackResult, Version,
};
use super::executor::Executor;
use super::ledger::Ledger;
use super::source::{MigrationSet, MigrationSource};
use crate::backends::DatabaseConnection;
use crate::config::MigrationConfig;
use crate::error::MigrateResult;
use crate::schema::{Fingerprinter, SchemaFingerprint};

/// What the box is doing right now
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BoxState {
    #[default]
    Clean,
    Applying { version: Version, direction: Direction },
}

/// Status of every Up migration in a set, in version order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatuses(Vec<MigrationStatus>);

impl MigrationStatuses {
    pub fn iter(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.0.iter().any(|status| status.state == MigrationState::Pending)
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.0.iter().filter(|status| status.state == MigrationState::Pending)
    }
}

impl IntoIterator for MigrationStatuses {
    type Item = MigrationStatus;
    type IntoIter = std::vec::IntoIter<MigrationStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One line per migration: `<version>\t<name>\t<Applied|Pending>`
impl fmt::Display for MigrationStatuses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for status in &self.0 {
            writeln!(f, "{}\t{}\t{}", status.version, status.name, status.state)?;
        }
        Ok(())
    }
}

pub struct MigrationBox {
    conn: Arc<dyn DatabaseConnection>,
    migrations: MigrationSet,
    executor: Executor,
    fingerprinter: Fingerprinter,
    state: Mutex<BoxState>,
}

impl MigrationBox {
    /// Build a box with the default ledger table
    pub fn new(conn: Arc<dyn DatabaseConnection>, source: &(impl MigrationSource + ?Sized)) -> MigrateResult<Self> {
        Self::with_config(conn, source, MigrationConfig::default())
    }

    /// Build a box, filtering `source` for the connection's dialect
    pub fn with_config(
        conn: Arc<dyn DatabaseConnection>,
        source: &(impl MigrationSource + ?Sized),
        config: MigrationConfig,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let migrations = MigrationSet::from_source(source, conn.dialect())?;

        debug!(
            dialect = %conn.dialect(),
            migrations = migrations.len(),
            ledger_table = %config.ledger_table,
            "migration box ready"
        );

        Ok(Self {
            conn,
            migrations,
            executor: Executor::new(Ledger::new(&config)),
            fingerprinter: Fingerprinter::new(&config),
            state: Mutex::new(BoxState::Clean),
        })
    }

    pub fn connection(&self) -> &Arc<dyn DatabaseConnection> {
        &self.conn
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    pub fn state(&self) -> BoxState {
        self.lock_state().clone()
    }

    /// Versions recorded in the ledger, including ones this set does not know
    pub async fn applied_versions(&self) -> MigrateResult<BTreeSet<Version>> {
        self.executor.ledger().applied_versions(self.conn.as_ref()).await
    }

    /// Apply every pending migration in version order, stopping at the first failure
    pub async fn up(&self) -> MigrateResult<MigrationRunResult> {
        self.apply_pending(None).await
    }

    /// Apply at most `steps` pending migrations
    pub async fn up_to(&self, steps: usize) -> MigrateResult<MigrationRunResult> {
        self.apply_pending(Some(steps)).await
    }

    async fn apply_pending(&self, limit: Option<usize>) -> MigrateResult<MigrationRunResult> {
        let start = Instant::now();
        let applied = self.applied_versions().await?;
        let mut result = MigrationRunResult::default();

        for migration in self.migrations.ups() {
            if applied.contains(&migration.version) {
                result.skipped_count += 1;
                continue;
            }
            if limit.is_some_and(|limit| result.applied_count() >= limit) {
                break;
            }

            self.run(migration).await?;
            result.applied_migrations.push(migration.version.clone());
        }

        result.execution_time_ms = start.elapsed().as_millis();
        if result.applied_migrations.is_empty() {
            debug!(skipped = result.skipped_count, "no pending migrations");
        }
        Ok(result)
    }

    /// Roll back the `steps` most recently applied versions of this set, newest
    /// first. A negative `steps` rolls back everything, zero does nothing.
    pub async fn down(&self, steps: i64) -> MigrateResult<RollbackResult> {
        let start = Instant::now();
        let mut result = RollbackResult::default();
        if steps == 0 {
            return Ok(result);
        }

        let applied = self.applied_versions().await?;
        let candidates: Vec<&Migration> = self
            .migrations
            .ups_descending()
            .filter(|up| applied.contains(&up.version))
            .collect();
        let limit = usize::try_from(steps).unwrap_or(candidates.len());

        for up in candidates.into_iter().take(limit) {
            let implicit;
            let down = match self.migrations.down_for(up) {
                Some(down) => down,
                None => {
                    warn!(
                        version = %up.version,
                        name = %up.name,
                        "no down migration, removing the version from the ledger only"
                    );
                    implicit = Migration::empty_down(up);
                    &implicit
                }
            };

            self.run(down).await?;
            result.rolled_back_migrations.push(up.version.clone());
        }

        result.execution_time_ms = start.elapsed().as_millis();
        Ok(result)
    }

    /// Applied/pending state of every Up migration in the set
    pub async fn status(&self) -> MigrateResult<MigrationStatuses> {
        let applied = self.applied_versions().await?;
        let statuses = self
            .migrations
            .ups()
            .iter()
            .map(|migration| MigrationStatus {
                version: migration.version.clone(),
                name: migration.name.clone(),
                state: if applied.contains(&migration.version) {
                    MigrationState::Applied
                } else {
                    MigrationState::Pending
                },
            })
            .collect();
        Ok(MigrationStatuses(statuses))
    }

    /// Write the status report to `writer`
    pub async fn write_status<W: Write>(&self, writer: &mut W) -> MigrateResult<()> {
        let statuses = self.status().await?;
        write!(writer, "{}", statuses)?;
        writer.flush()?;
        Ok(())
    }

    pub async fn has_pending(&self) -> MigrateResult<bool> {
        Ok(self.status().await?.has_pending())
    }

    /// Fingerprint of the connection's current schema, ledger table excluded
    pub async fn dump_migration_schema(&self) -> MigrateResult<SchemaFingerprint> {
        self.fingerprinter.fingerprint(self.conn.as_ref()).await
    }

    async fn run(&self, migration: &Migration) -> MigrateResult<()> {
        let _applying = self.enter(migration);
        info!(
            version = %migration.version,
            name = %migration.name,
            direction = %migration.direction,
            transactional = migration.transactional,
            "applying migration"
        );
        self.executor.apply(migration, self.conn.as_ref()).await
    }

    fn enter(&self, migration: &Migration) -> ApplyingGuard<'_> {
        *self.lock_state() = BoxState::Applying {
            version: migration.version.clone(),
            direction: migration.direction,
        };
        ApplyingGuard { state: &self.state }
    }

    fn lock_state(&self) -> MutexGuard<'_, BoxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MigrationBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationBox")
            .field("dialect", &self.conn.dialect())
            .field("migrations", &self.migrations.len())
            .field("state", &self.state())
            .finish()
    }
}

/// Returns the box to `Clean` when a migration finishes, fails or is dropped
struct ApplyingGuard<'a> {
    state: &'a Mutex<BoxState>,
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BoxState::Clean;
    }
}
