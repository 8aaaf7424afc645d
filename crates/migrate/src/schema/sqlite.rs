//! SQLite catalog reader built on `sqlite_master` and the table-valued pragmas

use std::collections::BTreeMap;

use sqlparser::ast::{ColumnOption, Expr, Ident, Statement, TableConstraint};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::warn;

use super::{is_truthy, ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};
use crate::backends::{DatabaseConnection, SqlDialect};
use crate::error::MigrateResult;

const USER_TABLES: &str = "m.type = 'table' AND m.name NOT LIKE 'sqlite_%'";

pub async fn read_schema(conn: &dyn DatabaseConnection) -> MigrateResult<SchemaSnapshot> {
    let mut snapshot = SchemaSnapshot::new(SqlDialect::SQLite);

    let columns_sql = format!(
        "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type, \
                CAST(p.\"notnull\" AS TEXT) AS not_null, p.dflt_value AS column_default, \
                CAST(p.pk AS TEXT) AS pk \
         FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE {USER_TABLES}"
    );
    for row in conn.fetch_all(&columns_sql, &[]).await? {
        let table = row.required_text("table_name")?;
        let column = row.required_text("column_name")?;
        let primary_key = row.required_text("pk")? != "0";
        snapshot.table_mut(&table).columns.insert(
            column,
            ColumnSnapshot {
                data_type: row.text("data_type")?.unwrap_or_default().to_ascii_uppercase(),
                nullable: !is_truthy(&row.required_text("not_null")?),
                default: row.text("column_default")?,
                primary_key,
            },
        );
    }

    // origin 'pk' is the implicit index behind a PRIMARY KEY
    let indexes_sql = format!(
        "SELECT m.name AS table_name, il.name AS index_name, CAST(il.\"unique\" AS TEXT) AS is_unique, \
                ii.name AS column_name \
         FROM sqlite_master m \
         JOIN pragma_index_list(m.name) il \
         JOIN pragma_index_info(il.name) ii \
         WHERE {USER_TABLES} AND il.origin <> 'pk' \
         ORDER BY m.name, il.name, ii.seqno"
    );
    for row in conn.fetch_all(&indexes_sql, &[]).await? {
        let table = row.required_text("table_name")?;
        let index_name = row.required_text("index_name")?;
        let unique = is_truthy(&row.required_text("is_unique")?);
        let column = row.text("column_name")?.unwrap_or_else(|| "<expression>".to_string());

        let index = snapshot
            .table_mut(&table)
            .indexes
            .entry(index_name)
            .or_insert_with(|| IndexSnapshot {
                unique,
                ..IndexSnapshot::default()
            });
        index.columns.push(column);
    }

    let foreign_keys_sql = format!(
        "SELECT m.name AS table_name, CAST(fk.id AS TEXT) AS fk_id, fk.\"table\" AS referenced_table, \
                fk.\"from\" AS column_name, fk.\"to\" AS referenced_column, \
                fk.on_update AS on_update, fk.on_delete AS on_delete \
         FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) fk \
         WHERE {USER_TABLES} \
         ORDER BY m.name, fk.id, fk.seq"
    );
    let mut foreign_keys: BTreeMap<(String, String), ForeignKeySnapshot> = BTreeMap::new();
    for row in conn.fetch_all(&foreign_keys_sql, &[]).await? {
        let table = row.required_text("table_name")?;
        let id = row.required_text("fk_id")?;
        let fk = foreign_keys
            .entry((table, id))
            .or_insert_with(|| ForeignKeySnapshot {
                columns: Vec::new(),
                referenced_table: String::new(),
                referenced_columns: Vec::new(),
                on_update: None,
                on_delete: None,
            });

        fk.referenced_table = row.required_text("referenced_table")?;
        fk.columns.push(row.required_text("column_name")?);
        // A NULL target column means the referenced table's primary key
        if let Some(referenced) = row.text("referenced_column")? {
            fk.referenced_columns.push(referenced);
        }
        fk.on_update = row.text("on_update")?;
        fk.on_delete = row.text("on_delete")?;
    }
    for ((table, _), fk) in foreign_keys {
        snapshot.table_mut(&table).foreign_keys.insert(fk);
    }

    // SQLite has no catalog view for CHECK constraints, only the stored CREATE TABLE text
    let definitions_sql =
        format!("SELECT m.name AS table_name, m.sql AS table_sql FROM sqlite_master m WHERE {USER_TABLES}");
    for row in conn.fetch_all(&definitions_sql, &[]).await? {
        let table = row.required_text("table_name")?;
        let Some(sql) = row.text("table_sql")? else {
            continue;
        };
        for (name, definition) in check_constraints(&table, &sql) {
            snapshot.table_mut(&table).constraints.insert(name, definition);
        }
    }

    Ok(snapshot)
}

/// Table and column level CHECK constraints of a `CREATE TABLE` statement.
/// Unnamed checks are keyed by their definition.
fn check_constraints(table: &str, sql: &str) -> Vec<(String, String)> {
    let statements = match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            warn!(table, error = %e, "could not parse table definition, its CHECK constraints are not fingerprinted");
            return Vec::new();
        }
    };

    let mut checks = Vec::new();
    for statement in statements {
        let Statement::CreateTable(create) = statement else {
            continue;
        };
        for column in &create.columns {
            for option in &column.options {
                if let ColumnOption::Check(expr) = &option.option {
                    checks.push(named_check(option.name.as_ref(), expr));
                }
            }
        }
        for constraint in &create.constraints {
            if let TableConstraint::Check { name, expr } = constraint {
                checks.push(named_check(name.as_ref(), expr));
            }
        }
    }
    checks
}

fn named_check(name: Option<&Ident>, expr: &Expr) -> (String, String) {
    let definition = format!("CHECK ({})", expr);
    let name = name.map_or_else(|| definition.clone(), |ident| ident.value.clone());
    (name, definition)
}
