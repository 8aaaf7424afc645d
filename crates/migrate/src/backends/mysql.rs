//! MySQL Backend Implementation

use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, Pool, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use crate::config::ConnectionConfig;
use crate::error::{MigrateResult, MigrationError};

/// MySQL connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    pool: Pool<MySql>,
}

impl MySqlConnection {
    pub async fn connect(config: &ConnectionConfig) -> MigrateResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create MySQL pool: {}", e)))?;

        debug!(dialect = "mysql", "connection pool opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        // Parameterless statements use the text protocol; several DDL statements
        // cannot be prepared.
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
        Ok(Box::new(MySqlTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> MigrateResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// MySQL transaction implementation
///
/// DDL inside the transaction commits implicitly; the executor only opens one
/// for DML-only work on this dialect.
pub struct MySqlTransaction {
    tx: Option<sqlx::Transaction<'static, MySql>>,
}

impl MySqlTransaction {
    fn inner(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, MySql>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::Connection("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for MySqlTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
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
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[DatabaseValue],
) -> Query<'q, MySql, MySqlArguments> {
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

fn decode_row(row: &MySqlRow) -> MigrateResult<DatabaseRow> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|index| decode_value(row, index))
        .collect::<MigrateResult<Vec<_>>>()?;
    Ok(DatabaseRow::new(columns, values))
}

/// Convert a MySQL column value to DatabaseValue.
///
/// information_schema reports several text columns with binary collations
/// depending on the server version, so text falls back to raw bytes.
fn decode_value(row: &MySqlRow, index: usize) -> MigrateResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => DatabaseValue::Int64(row.try_get(index)?),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
            let value: u64 = row.try_get(index)?;
            DatabaseValue::Int64(i64::try_from(value).map_err(|e| {
                MigrationError::Connection(format!("Unsigned value out of range in column {}: {}", index, e))
            })?)
        }
        "FLOAT" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => DatabaseValue::Float64(row.try_get(index)?),
        "DATETIME" | "TIMESTAMP" => DatabaseValue::Timestamp(row.try_get(index)?),
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => DatabaseValue::String(text),
            Err(_) => DatabaseValue::Bytes(row.try_get(index)?),
        },
    };
    Ok(value)
}
