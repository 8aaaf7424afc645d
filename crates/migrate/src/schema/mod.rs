//! Schema Fingerprinter
//!
//! Reads the live catalog into an ordered [`SchemaSnapshot`] and serializes it
//! to canonical JSON. Two databases with the same tables, columns, indexes,
//! foreign keys and named constraints produce identical bytes no matter in
//! which order, or in how many migrations, those objects were created.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backends::{DatabaseConnection, SqlDialect};
use crate::config::MigrationConfig;
use crate::error::MigrateResult;

/// Structured schema, keyed by object name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub dialect: String,
    pub tables: BTreeMap<String, TableSnapshot>,
}

impl SchemaSnapshot {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect: dialect.as_str().to_string(),
            tables: BTreeMap::new(),
        }
    }

    pub fn table_mut(&mut self, name: &str) -> &mut TableSnapshot {
        self.tables.entry(name.to_string()).or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub columns: BTreeMap<String, ColumnSnapshot>,
    /// Secondary indexes; primary keys show up as `ColumnSnapshot::primary_key`
    pub indexes: BTreeMap<String, IndexSnapshot>,
    pub foreign_keys: BTreeSet<ForeignKeySnapshot>,
    /// Named UNIQUE / CHECK constraints mapped to their definition
    pub constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub unique: bool,
    pub columns: Vec<String>,
    /// Server-rendered DDL, for catalogs that only expose the index that way
    pub definition: Option<String>,
}

/// Foreign keys are compared by shape; generated constraint names are ignored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeySnapshot {
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

/// Opaque, comparable schema representation
#[derive(Debug, Clone)]
pub struct SchemaFingerprint {
    bytes: Vec<u8>,
    snapshot: SchemaSnapshot,
}

impl SchemaFingerprint {
    pub fn from_snapshot(snapshot: SchemaSnapshot) -> MigrateResult<Self> {
        let bytes = serde_json::to_vec(&snapshot)?;
        Ok(Self { bytes, snapshot })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The structure the bytes were derived from
    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }
}

impl PartialEq for SchemaFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SchemaFingerprint {}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.bytes))
    }
}

/// Derives fingerprints from the connection's catalog, skipping the ledger table
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    ledger_table: String,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(&MigrationConfig::default())
    }
}

impl Fingerprinter {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            ledger_table: config.ledger_table.clone(),
        }
    }

    pub async fn snapshot(&self, conn: &dyn DatabaseConnection) -> MigrateResult<SchemaSnapshot> {
        let mut snapshot = match conn.dialect() {
            SqlDialect::SQLite => sqlite::read_schema(conn).await?,
            SqlDialect::PostgreSQL | SqlDialect::CockroachDB => postgres::read_schema(conn).await?,
            SqlDialect::MySQL => mysql::read_schema(conn).await?,
        };
        snapshot
            .tables
            .retain(|name, _| !name.eq_ignore_ascii_case(&self.ledger_table));

        debug!(dialect = %conn.dialect(), tables = snapshot.tables.len(), "read schema snapshot");
        Ok(snapshot)
    }

    pub async fn fingerprint(&self, conn: &dyn DatabaseConnection) -> MigrateResult<SchemaFingerprint> {
        SchemaFingerprint::from_snapshot(self.snapshot(conn).await?)
    }
}

/// Catalog booleans arrive as `1`, `t`, `true` or `YES` depending on the dialect
pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "t" | "true" | "yes")
}

pub(crate) fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}
