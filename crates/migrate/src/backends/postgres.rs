//! PostgreSQL Backend Implementation
//!
//! Also serves CockroachDB, which speaks the PostgreSQL wire protocol; the
//! dialect is carried alongside the pool so migrations and fingerprints can
//! tell the two apart.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Pool, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use crate::config::ConnectionConfig;
use crate::error::{MigrateResult, MigrationError};

/// PostgreSQL (or CockroachDB) connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
    dialect: SqlDialect,
}

impl PostgresConnection {
    /// Connect using a `postgres://` URL; `dialect` is either PostgreSQL or CockroachDB.
    pub async fn connect(config: &ConnectionConfig, dialect: SqlDialect) -> MigrateResult<Self> {
        if !matches!(dialect, SqlDialect::PostgreSQL | SqlDialect::CockroachDB) {
            return Err(MigrationError::Connection(format!(
                "PostgreSQL backend cannot serve the {} dialect",
                dialect
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create {} pool: {}", dialect, e)))?;

        debug!(%dialect, "connection pool opened");
        Ok(Self { pool, dialect })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        // Parameterless statements go through the simple query protocol, which
        // accepts any DDL and multiple statements.
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
        Ok(Box::new(PostgresTransaction {
            tx: Some(tx),
            dialect: self.dialect,
        }))
    }

    async fn close(&self) -> MigrateResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    dialect: SqlDialect,
}

impl PostgresTransaction {
    fn inner(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::Connection("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    fn dialect(&self) -> SqlDialect {
        self.dialect
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

/// Bind DatabaseValues to a sqlx query
fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> Query<'q, Postgres, PgArguments> {
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

fn decode_row(row: &PgRow) -> MigrateResult<DatabaseRow> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|index| decode_value(row, index))
        .collect::<MigrateResult<Vec<_>>>()?;
    Ok(DatabaseRow::new(columns, values))
}

/// Convert a PostgreSQL column value to DatabaseValue
fn decode_value(row: &PgRow, index: usize) -> MigrateResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int64(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int64(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::Timestamp(row.try_get(index)?),
        "TIMESTAMPTZ" => {
            let value: chrono::DateTime<chrono::Utc> = row.try_get(index)?;
            DatabaseValue::Timestamp(value.naive_utc())
        }
        _ => DatabaseValue::String(row.try_get(index)?),
    };
    Ok(value)
}
