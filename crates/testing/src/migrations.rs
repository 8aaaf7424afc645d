//! Temporary migration directories

use std::fs;
use std::path::Path;

use schemabox_migrate::DirectorySource;
use tempfile::TempDir;

use crate::TestResult;

/// A directory of migration files that is deleted when dropped
pub struct TempMigrations {
    dir: TempDir,
}

impl TempMigrations {
    pub fn new() -> TestResult<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Copy every file of `fixtures` into a fresh temporary directory
    pub fn copy_from(fixtures: impl AsRef<Path>) -> TestResult<Self> {
        let migrations = Self::new()?;
        for entry in fs::read_dir(fixtures)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), migrations.path().join(entry.file_name()))?;
            }
        }
        Ok(migrations)
    }

    pub fn with_file(self, name: &str, sql: &str) -> TestResult<Self> {
        self.add(name, sql)?;
        Ok(self)
    }

    pub fn add(&self, name: &str, sql: &str) -> TestResult<()> {
        fs::write(self.path().join(name), sql)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> TestResult<()> {
        fs::remove_file(self.path().join(name))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> DirectorySource {
        DirectorySource::new(self.path())
    }
}

#[cfg(test)]
mod tests {
    use schemabox_migrate::{MigrationSource, SqlDialect};

    use super::*;

    #[test]
    fn test_files_become_migrations() {
        let dir = TempMigrations::new()
            .unwrap()
            .with_file("1_notes.up.sql", "CREATE TABLE notes (id INTEGER);")
            .unwrap()
            .with_file("1_notes.down.sql", "DROP TABLE notes;")
            .unwrap()
            .with_file("README.md", "not a migration")
            .unwrap();

        let migrations = dir.source().migrations().unwrap();
        assert_eq!(migrations.len(), 2);
        assert!(migrations.iter().all(|m| m.applies_to(SqlDialect::SQLite)));
    }

    #[test]
    fn test_copy_and_remove() {
        let original = TempMigrations::new()
            .unwrap()
            .with_file("1_notes.up.sql", "CREATE TABLE notes (id INTEGER);")
            .unwrap();
        let copy = TempMigrations::copy_from(original.path()).unwrap();
        assert!(copy.path().join("1_notes.up.sql").exists());

        copy.remove("1_notes.up.sql").unwrap();
        assert!(copy.source().migrations().unwrap().is_empty());
    }
}
