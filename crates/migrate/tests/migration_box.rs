//! Migration box behaviour against real databases.
//!
//! Every test runs on a private SQLite in-memory database. The lifecycle test
//! also runs on each external database configured through `TEST_*_URL`.

use async_trait::async_trait;
use schemabox_migrate::{
    BoxState, Direction, DirectorySource, EmbeddedSource, ExecutionTarget, MigrateResult, Migration, MigrationBox,
    MigrationCallback, MigrationError, MigrationSource, MigrationState, SqlDialect, Version,
};
use schemabox_testing::prelude::*;

fn legacy() -> DirectorySource {
    DirectorySource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/legacy"))
}

async fn lifecycle(db: &TestDatabase) {
    let migration_box = MigrationBox::new(db.connection(), &legacy()).unwrap();
    let before = migration_box.dump_migration_schema().await.unwrap();

    // Idempotent up
    let first = migration_box.up().await.unwrap();
    assert!(first.applied_count() > 0);
    let after_up = migration_box.dump_migration_schema().await.unwrap();
    let second = migration_box.up().await.unwrap();
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count, first.applied_count());
    assert_eq!(migration_box.dump_migration_schema().await.unwrap(), after_up);

    // Status completeness
    let statuses = migration_box.status().await.unwrap();
    assert_eq!(statuses.len(), migration_box.migrations().len());
    assert!(statuses.iter().all(|status| status.state == MigrationState::Applied));

    // Dialect exclusion: the MySQL-only migration is invisible elsewhere
    let mysql_only = Version::from("20200101000002");
    let listed = statuses.iter().any(|status| status.version == mysql_only);
    assert_eq!(listed, db.dialect() == SqlDialect::MySQL);

    // Round trip
    let rolled_back = migration_box.down(-1).await.unwrap();
    assert_eq!(rolled_back.rolled_back_count(), first.applied_count());
    assert!(migration_box.applied_versions().await.unwrap().is_empty());
    assert_eq!(migration_box.dump_migration_schema().await.unwrap(), before);
    assert!(!db.table_exists("identities").await.unwrap());

    migration_box.up().await.unwrap();
    assert_eq!(migration_box.dump_migration_schema().await.unwrap(), after_up);
    assert_eq!(migration_box.state(), BoxState::Clean);

    migration_box.down(-1).await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_on_every_configured_database() {
    init_tracing();
    for db in TestDatabase::all().await.unwrap() {
        lifecycle(&db).await;
        db.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_down_steps_follow_version_order() {
    let db = TestDatabase::sqlite().await.unwrap();
    let migration_box = MigrationBox::new(db.connection(), &legacy()).unwrap();
    migration_box.up().await.unwrap();

    let result = migration_box.down(2).await.unwrap();
    assert_eq!(
        result.rolled_back_migrations,
        vec![Version::from("20200101000005"), Version::from("20200101000004")]
    );

    let mut out = Vec::new();
    migration_box.write_status(&mut out).await.unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "20200101000001\tidentities\tApplied\n\
         20200101000003\tcredentials\tApplied\n\
         20200101000004\tcredentials_index\tPending\n\
         20200101000005\tidentities_state\tPending\n"
    );
}

#[tokio::test]
async fn test_failed_migration_keeps_earlier_ones_and_resumes() {
    init_tracing();
    let db = TestDatabase::sqlite().await.unwrap();
    let dir = TempMigrations::new()
        .unwrap()
        .with_file("1_notes.up.sql", "CREATE TABLE notes (id INTEGER PRIMARY KEY);")
        .unwrap()
        .with_file(
            "2_tags.up.sql",
            "CREATE TABLE tags (id INTEGER PRIMARY KEY);\nINSERT INTO no_such_table (id) VALUES (1);",
        )
        .unwrap()
        .with_file("3_labels.up.sql", "CREATE TABLE labels (id INTEGER PRIMARY KEY);")
        .unwrap();

    let migration_box = MigrationBox::new(db.connection(), &dir.source()).unwrap();
    let err = migration_box.up().await.unwrap_err();
    assert!(matches!(err, MigrationError::Execution { ref version, .. } if version == "2"));

    assert!(db.table_exists("notes").await.unwrap());
    assert!(!db.table_exists("tags").await.unwrap());
    assert!(!db.table_exists("labels").await.unwrap());
    assert_eq!(
        migration_box.applied_versions().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec![Version::from("1")]
    );

    dir.add("2_tags.up.sql", "CREATE TABLE tags (id INTEGER PRIMARY KEY);").unwrap();
    let fixed = MigrationBox::new(db.connection(), &dir.source()).unwrap();
    let result = fixed.up().await.unwrap();
    assert_eq!(result.applied_migrations, vec![Version::from("2"), Version::from("3")]);
    assert_eq!(result.skipped_count, 1);
}

#[tokio::test]
async fn test_autocommit_ledger_failure_surfaces() {
    let db = TestDatabase::sqlite().await.unwrap();
    let dir = TempMigrations::new()
        .unwrap()
        .with_file("1_drop_ledger.autocommit.up.sql", "DROP TABLE schema_migration;")
        .unwrap();

    let migration_box = MigrationBox::new(db.connection(), &dir.source()).unwrap();
    let err = migration_box.up().await.unwrap_err();
    assert!(matches!(err, MigrationError::LedgerInconsistency { ref version, .. } if version == "1"));
    assert_eq!(migration_box.state(), BoxState::Clean);
}

#[tokio::test]
async fn test_source_errors() {
    let db = TestDatabase::sqlite().await.unwrap();

    let malformed = TempMigrations::new()
        .unwrap()
        .with_file("1_notes.oracle.up.sql", "SELECT 1;")
        .unwrap();
    let err = MigrationBox::new(db.connection(), &malformed.source()).unwrap_err();
    assert!(matches!(err, MigrationError::MalformedMigration { .. }));

    let duplicate = TempMigrations::new()
        .unwrap()
        .with_file("1_notes.up.sql", "SELECT 1;")
        .unwrap()
        .with_file("1_other.up.sql", "SELECT 2;")
        .unwrap();
    let err = MigrationBox::new(db.connection(), &duplicate.source()).unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateVersion { .. }));

    let missing = DirectorySource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/missing"));
    let err = MigrationBox::new(db.connection(), &missing).unwrap_err();
    assert!(matches!(err, MigrationError::Io { .. }));
}

#[tokio::test]
async fn test_embedded_source() {
    let db = TestDatabase::sqlite().await.unwrap();
    let source = EmbeddedSource::new([
        (
            "20200101000001_identities.up.sql",
            include_str!("fixtures/legacy/20200101000001_identities.up.sql"),
        ),
        (
            "20200101000001_identities.down.sql",
            include_str!("fixtures/legacy/20200101000001_identities.down.sql"),
        ),
    ]);

    let migration_box = MigrationBox::new(db.connection(), &source).unwrap();
    migration_box.up().await.unwrap();
    assert!(db.table_exists("identities").await.unwrap());

    migration_box.down(1).await.unwrap();
    assert!(!db.table_exists("identities").await.unwrap());
}

struct SeedIdentities;

#[async_trait]
impl MigrationCallback for SeedIdentities {
    async fn run(&self, target: &mut ExecutionTarget<'_>) -> MigrateResult<()> {
        let dialect = target.dialect();
        let sql = format!(
            "INSERT INTO identities (id, traits, created_at, state) VALUES ({}, '{{}}', CURRENT_TIMESTAMP, 'active')",
            dialect.parameter_placeholder(0)
        );
        for id in ["a", "b"] {
            target.execute(&sql, &[id.into()]).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_callback_migration_mixed_with_files() {
    let db = TestDatabase::sqlite().await.unwrap();
    let mut migrations = DirectorySource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/transactional"))
        .migrations()
        .unwrap();
    migrations.push(Migration::callback(
        "20200101000006",
        "seed_identities",
        Direction::Up,
        SeedIdentities,
    ));

    let migration_box = MigrationBox::new(db.connection(), &migrations).unwrap();
    let result = migration_box.up().await.unwrap();
    assert_eq!(result.applied_count(), migration_box.migrations().len());
    assert_eq!(result.applied_migrations.last(), Some(&Version::from("20200101000006")));
    assert_eq!(db.count_rows("identities").await.unwrap(), 2);

    // No down migration for the seed: it is only unrecorded
    let rolled_back = migration_box.down(1).await.unwrap();
    assert_eq!(rolled_back.rolled_back_migrations, vec![Version::from("20200101000006")]);
    assert_eq!(db.count_rows("identities").await.unwrap(), 2);
}

#[tokio::test]
async fn test_boxes_share_the_ledger() {
    let db = TestDatabase::sqlite().await.unwrap();
    let first = MigrationBox::new(db.connection(), &legacy()).unwrap();
    first.up_to(2).await.unwrap();

    let second = MigrationBox::new(db.connection(), &legacy()).unwrap();
    let pending: Vec<_> = second.status().await.unwrap().pending().map(|s| s.version.clone()).collect();
    assert_eq!(pending, vec![Version::from("20200101000004"), Version::from("20200101000005")]);

    second.up().await.unwrap();
    assert!(!first.has_pending().await.unwrap());
}
