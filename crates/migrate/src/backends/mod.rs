//! Database Backend Abstractions
//!
//! One sqlx-backed implementation per dialect behind the `DatabaseConnection`
//! trait. `connect` picks the backend from the URL scheme.

pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use self::mysql::MySqlConnection;
pub use self::postgres::PostgresConnection;
pub use self::sqlite::SqliteConnection;

use crate::config::ConnectionConfig;
use crate::error::{MigrateResult, MigrationError};

/// Detect the SQL dialect from a database URL
pub fn detect_dialect(url: &str) -> MigrateResult<SqlDialect> {
    let scheme = url
        .split_once(':')
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| MigrationError::Connection(format!("Unable to detect database backend from URL: {}", url)))?;

    match scheme.as_str() {
        "sqlite" | "file" => Ok(SqlDialect::SQLite),
        "postgres" | "postgresql" => Ok(SqlDialect::PostgreSQL),
        "mysql" => Ok(SqlDialect::MySQL),
        "cockroach" | "cockroachdb" => Ok(SqlDialect::CockroachDB),
        _ => Err(MigrationError::Connection(format!(
            "Unable to detect database backend from URL: {}",
            url
        ))),
    }
}

/// CockroachDB URLs are served by the PostgreSQL driver
fn postgres_wire_url(url: &str) -> MigrateResult<String> {
    let mut parsed = url::Url::parse(url)
        .map_err(|e| MigrationError::Connection(format!("Invalid database URL: {}", e)))?;

    if parsed.scheme() != "postgres" && parsed.scheme() != "postgresql" {
        // `Url::set_scheme` refuses to switch between special and non-special
        // schemes; neither side is special here.
        parsed
            .set_scheme("postgres")
            .map_err(|_| MigrationError::Connection(format!("Cannot rewrite URL scheme: {}", url)))?;
    }
    Ok(parsed.to_string())
}

/// Open a connection for `url` with default pool settings
pub async fn connect(url: &str) -> MigrateResult<Arc<dyn DatabaseConnection>> {
    connect_with(ConnectionConfig::new(url)).await
}

/// Open a connection using the backend matching the configured URL
pub async fn connect_with(config: ConnectionConfig) -> MigrateResult<Arc<dyn DatabaseConnection>> {
    let dialect = detect_dialect(&config.url)?;

    let conn: Arc<dyn DatabaseConnection> = match dialect {
        SqlDialect::SQLite => Arc::new(SqliteConnection::connect(&config).await?),
        SqlDialect::MySQL => Arc::new(MySqlConnection::connect(&config).await?),
        SqlDialect::PostgreSQL => Arc::new(PostgresConnection::connect(&config, dialect).await?),
        SqlDialect::CockroachDB => {
            let config = ConnectionConfig {
                url: postgres_wire_url(&config.url)?,
                ..config
            };
            Arc::new(PostgresConnection::connect(&config, dialect).await?)
        }
    };

    Ok(conn)
}
