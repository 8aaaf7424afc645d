//! Differently organized migration sets must reach the same schema.

use schemabox_migrate::{DirectorySource, MigrationBox, MigrationState, SchemaFingerprint};
use schemabox_testing::prelude::*;

fn fixtures(name: &str) -> DirectorySource {
    DirectorySource::new(format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name))
}

async fn migrate(db: &TestDatabase, set: &str) -> SchemaFingerprint {
    let migration_box = MigrationBox::new(db.connection(), &fixtures(set)).unwrap();
    migration_box.up().await.unwrap();
    assert!(!migration_box.has_pending().await.unwrap());
    migration_box.dump_migration_schema().await.unwrap()
}

async fn rollback(db: &TestDatabase, set: &str) {
    let migration_box = MigrationBox::new(db.connection(), &fixtures(set)).unwrap();
    migration_box.down(-1).await.unwrap();
    assert!(migration_box.applied_versions().await.unwrap().is_empty());
}

/// Apply each set in turn on one connection, rolling back in between
async fn converge_on(db: &TestDatabase) {
    let legacy = migrate(db, "legacy").await;
    rollback(db, "legacy").await;

    let transactional = migrate(db, "transactional").await;
    rollback(db, "transactional").await;

    let grouped = migrate(db, "grouped").await;
    rollback(db, "grouped").await;

    assert_eq!(legacy, transactional, "legacy: {}\ntransactional: {}", legacy, transactional);
    assert_eq!(legacy, grouped);
    assert!(legacy.snapshot().tables.contains_key("credentials"));
}

/// Legacy and transactional cover the same versions, so they read each other's ledger rows
async fn share_ledger_on(db: &TestDatabase) {
    let legacy = MigrationBox::new(db.connection(), &fixtures("legacy")).unwrap();
    let transactional = MigrationBox::new(db.connection(), &fixtures("transactional")).unwrap();

    legacy.up().await.unwrap();
    let expected = legacy.dump_migration_schema().await.unwrap();

    let statuses = transactional.status().await.unwrap();
    assert_eq!(statuses.len(), legacy.migrations().len());
    assert!(statuses.iter().all(|status| status.state == MigrationState::Applied), "{}", statuses);

    let noop = transactional.up().await.unwrap();
    assert_eq!(noop.applied_count(), 0);
    assert_eq!(transactional.dump_migration_schema().await.unwrap(), expected);

    legacy.down(-1).await.unwrap();
    assert!(transactional.status().await.unwrap().iter().all(|status| status.state == MigrationState::Pending));

    let reapplied = transactional.up().await.unwrap();
    assert_eq!(reapplied.applied_count(), transactional.migrations().len());
    let actual = transactional.dump_migration_schema().await.unwrap();
    assert_eq!(expected, actual, "legacy: {}\ntransactional: {}", expected, actual);

    transactional.down(-1).await.unwrap();
    assert!(legacy.applied_versions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_convergence_on_every_configured_database() {
    init_tracing();
    for db in TestDatabase::all().await.unwrap() {
        converge_on(&db).await;
        share_ledger_on(&db).await;
        db.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_convergence_on_two_fresh_connections() {
    let first = TestDatabase::sqlite().await.unwrap();
    let second = TestDatabase::sqlite().await.unwrap();

    let legacy = migrate(&first, "legacy").await;
    let grouped = migrate(&second, "grouped").await;

    assert_eq!(legacy, grouped);
    assert_eq!(legacy.to_string(), grouped.to_string());
    assert_eq!(legacy.as_bytes(), grouped.as_bytes());
}

#[tokio::test]
async fn test_partial_sets_differ() {
    let first = TestDatabase::sqlite().await.unwrap();
    let second = TestDatabase::sqlite().await.unwrap();

    let complete = migrate(&first, "legacy").await;

    let partial_box = MigrationBox::new(second.connection(), &fixtures("legacy")).unwrap();
    partial_box.up_to(2).await.unwrap();
    let partial = partial_box.dump_migration_schema().await.unwrap();

    assert_ne!(complete, partial);
    let identities = &partial.snapshot().tables["identities"];
    assert!(!identities.columns.contains_key("state"));
}
