//! MySQL catalog reader over `information_schema`, scoped to `DATABASE()`

use std::collections::BTreeMap;

use super::{is_truthy, push_unique, ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};
use crate::backends::{DatabaseConnection, SqlDialect};
use crate::error::MigrateResult;

const COLUMNS_SQL: &str = "\
SELECT c.TABLE_NAME AS table_name, c.COLUMN_NAME AS column_name, c.COLUMN_TYPE AS data_type,
       c.IS_NULLABLE AS is_nullable, c.COLUMN_DEFAULT AS column_default, c.COLUMN_KEY AS column_key
FROM information_schema.COLUMNS c
JOIN information_schema.TABLES t
  ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
WHERE c.TABLE_SCHEMA = DATABASE() AND t.TABLE_TYPE = 'BASE TABLE'";

const INDEXES_SQL: &str = "\
SELECT s.TABLE_NAME AS table_name, s.INDEX_NAME AS index_name,
       CAST(s.NON_UNIQUE AS CHAR) AS non_unique, s.COLUMN_NAME AS column_name
FROM information_schema.STATISTICS s
WHERE s.TABLE_SCHEMA = DATABASE() AND s.INDEX_NAME <> 'PRIMARY'
ORDER BY s.TABLE_NAME, s.INDEX_NAME, s.SEQ_IN_INDEX";

const FOREIGN_KEYS_SQL: &str = "\
SELECT k.TABLE_NAME AS table_name, k.CONSTRAINT_NAME AS constraint_name,
       k.COLUMN_NAME AS column_name, k.REFERENCED_TABLE_NAME AS referenced_table,
       k.REFERENCED_COLUMN_NAME AS referenced_column,
       r.UPDATE_RULE AS on_update, r.DELETE_RULE AS on_delete
FROM information_schema.KEY_COLUMN_USAGE k
JOIN information_schema.REFERENTIAL_CONSTRAINTS r
  ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
WHERE k.TABLE_SCHEMA = DATABASE() AND k.REFERENCED_TABLE_NAME IS NOT NULL
ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION";

// Needs MySQL 8.0.16 or MariaDB 10.2; unnamed checks get generated `<table>_chk_<n>` names
const CHECKS_SQL: &str = "\
SELECT tc.TABLE_NAME AS table_name, tc.CONSTRAINT_NAME AS constraint_name, cc.CHECK_CLAUSE AS check_clause
FROM information_schema.TABLE_CONSTRAINTS tc
JOIN information_schema.CHECK_CONSTRAINTS cc
  ON cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA AND cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
WHERE tc.TABLE_SCHEMA = DATABASE() AND tc.CONSTRAINT_TYPE = 'CHECK'";

pub async fn read_schema(conn: &dyn DatabaseConnection) -> MigrateResult<SchemaSnapshot> {
    let mut snapshot = SchemaSnapshot::new(SqlDialect::MySQL);

    for row in conn.fetch_all(COLUMNS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        snapshot.table_mut(&table).columns.insert(
            row.required_text("column_name")?,
            ColumnSnapshot {
                data_type: row.required_text("data_type")?,
                nullable: is_truthy(&row.required_text("is_nullable")?),
                default: row.text("column_default")?,
                primary_key: row.text("column_key")?.as_deref() == Some("PRI"),
            },
        );
    }

    for row in conn.fetch_all(INDEXES_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let unique = !is_truthy(&row.required_text("non_unique")?);
        let column = row.text("column_name")?.unwrap_or_else(|| "<expression>".to_string());
        snapshot
            .table_mut(&table)
            .indexes
            .entry(row.required_text("index_name")?)
            .or_insert_with(|| IndexSnapshot {
                unique,
                ..IndexSnapshot::default()
            })
            .columns
            .push(column);
    }

    let mut foreign_keys: BTreeMap<(String, String), ForeignKeySnapshot> = BTreeMap::new();
    for row in conn.fetch_all(FOREIGN_KEYS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let name = row.required_text("constraint_name")?;
        let referenced_table = row.required_text("referenced_table")?;
        let fk = foreign_keys
            .entry((table, name))
            .or_insert_with(|| ForeignKeySnapshot {
                columns: Vec::new(),
                referenced_table,
                referenced_columns: Vec::new(),
                on_update: None,
                on_delete: None,
            });

        push_unique(&mut fk.columns, row.required_text("column_name")?);
        push_unique(&mut fk.referenced_columns, row.required_text("referenced_column")?);
        fk.on_update = row.text("on_update")?;
        fk.on_delete = row.text("on_delete")?;
    }
    for ((table, _), fk) in foreign_keys {
        snapshot.table_mut(&table).foreign_keys.insert(fk);
    }

    for row in conn.fetch_all(CHECKS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let definition = format!("CHECK {}", row.required_text("check_clause")?);
        snapshot
            .table_mut(&table)
            .constraints
            .insert(row.required_text("constraint_name")?, definition);
    }

    Ok(snapshot)
}
