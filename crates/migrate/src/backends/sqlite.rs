//! SQLite Backend Implementation
//!
//! In-memory databases live inside a single pooled connection that never
//! expires; closing the pool drops the database.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Pool, Row, Sqlite, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use crate::config::ConnectionConfig;
use crate::error::{MigrateResult, MigrationError};

/// SQLite connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: Pool<Sqlite>,
}

impl SqliteConnection {
    pub async fn connect(config: &ConnectionConfig) -> MigrateResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| MigrationError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
        let pool_options = if is_in_memory(&config.url) {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to open SQLite database: {}", e)))?;

        debug!(dialect = "sqlite", "connection pool opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let result = if params.is_empty() {
            Executor::execute(&self.pool, sql).await?
        } else {
            bind_values(sqlx::query(sql), params).execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>> {
        let rows = if params.is_empty() {
            Executor::fetch_all(&self.pool, sql).await?
        } else {
            bind_values(sqlx::query(sql), params).fetch_all(&self.pool).await?
        };
        rows.iter().map(decode_row).collect()
    }

    async fn begin_transaction(&self) -> MigrateResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> MigrateResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn inner(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::Connection("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let tx = self.inner()?;
        let result = if params.is_empty() {
            Executor::execute(&mut **tx, sql).await?
        } else {
            bind_values(sqlx::query(sql), params).execute(&mut **tx).await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>> {
        let tx = self.inner()?;
        let rows = if params.is_empty() {
            Executor::fetch_all(&mut **tx, sql).await?
        } else {
            bind_values(sqlx::query(sql), params).fetch_all(&mut **tx).await?
        };
        rows.iter().map(decode_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::Connection("Transaction already completed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::Connection("Transaction already completed".to_string()))?;
        tx.rollback().await?;
        Ok(())
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[DatabaseValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> MigrateResult<DatabaseRow> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|index| decode_value(row, index))
        .collect::<MigrateResult<Vec<_>>>()?;
    Ok(DatabaseRow::new(columns, values))
}

/// Decode by the storage class of the value, not the declared column type
fn decode_value(row: &SqliteRow, index: usize) -> MigrateResult<DatabaseValue> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(DatabaseValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => DatabaseValue::Int64(row.try_get(index)?),
        "REAL" | "NUMERIC" => DatabaseValue::Float64(row.try_get(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get(index)?),
    };
    Ok(value)
}
