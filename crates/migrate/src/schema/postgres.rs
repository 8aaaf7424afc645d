//! PostgreSQL and CockroachDB catalog reader
//!
//! Both speak the same `information_schema` and `pg_indexes`, restricted to
//! `current_schema()`. Every value is cast to text in SQL so decoding does not
//! depend on the catalog column types, which differ between the two.

use std::collections::BTreeMap;

use super::{is_truthy, push_unique, ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};
use crate::backends::DatabaseConnection;
use crate::error::MigrateResult;

const COLUMNS_SQL: &str = "\
SELECT c.table_name::text AS table_name, c.column_name::text AS column_name,
       c.data_type::text AS data_type, c.character_maximum_length::text AS max_length,
       c.is_nullable::text AS is_nullable, c.column_default::text AS column_default
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE'";

const PRIMARY_KEYS_SQL: &str = "\
SELECT kcu.table_name::text AS table_name, kcu.column_name::text AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_schema = tc.constraint_schema
 AND kcu.constraint_name = tc.constraint_name
 AND kcu.table_name = tc.table_name
WHERE tc.table_schema = current_schema() AND tc.constraint_type = 'PRIMARY KEY'";

const INDEXES_SQL: &str = "\
SELECT i.tablename::text AS table_name, i.indexname::text AS index_name, i.indexdef::text AS definition
FROM pg_indexes i
WHERE i.schemaname = current_schema()
  AND i.indexname NOT IN (
      SELECT tc.constraint_name
      FROM information_schema.table_constraints tc
      WHERE tc.table_schema = current_schema() AND tc.constraint_type = 'PRIMARY KEY'
  )";

const FOREIGN_KEYS_SQL: &str = "\
SELECT tc.table_name::text AS table_name, tc.constraint_name::text AS constraint_name,
       kcu.column_name::text AS column_name, ccu.table_name::text AS referenced_table,
       ccu.column_name::text AS referenced_column,
       rc.update_rule::text AS on_update, rc.delete_rule::text AS on_delete
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_schema = tc.constraint_schema
 AND kcu.constraint_name = tc.constraint_name
 AND kcu.table_name = tc.table_name
JOIN information_schema.referential_constraints rc
  ON rc.constraint_schema = tc.constraint_schema AND rc.constraint_name = tc.constraint_name
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_schema = tc.constraint_schema AND ccu.constraint_name = tc.constraint_name
WHERE tc.table_schema = current_schema() AND tc.constraint_type = 'FOREIGN KEY'
ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";

// Implicit NOT NULL checks are already covered by `ColumnSnapshot::nullable`
const CONSTRAINTS_SQL: &str = "\
SELECT tc.table_name::text AS table_name, tc.constraint_name::text AS constraint_name,
       tc.constraint_type::text AS constraint_type, cc.check_clause::text AS check_clause
FROM information_schema.table_constraints tc
LEFT JOIN information_schema.check_constraints cc
  ON cc.constraint_schema = tc.constraint_schema AND cc.constraint_name = tc.constraint_name
WHERE tc.table_schema = current_schema()
  AND tc.constraint_type IN ('UNIQUE', 'CHECK')
  AND tc.constraint_name::text NOT LIKE '%_not_null'";

pub async fn read_schema(conn: &dyn DatabaseConnection) -> MigrateResult<SchemaSnapshot> {
    let mut snapshot = SchemaSnapshot::new(conn.dialect());

    for row in conn.fetch_all(COLUMNS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let column = row.required_text("column_name")?;
        let data_type = match row.text("max_length")? {
            Some(length) => format!("{}({})", row.required_text("data_type")?, length),
            None => row.required_text("data_type")?,
        };
        snapshot.table_mut(&table).columns.insert(
            column,
            ColumnSnapshot {
                data_type,
                nullable: is_truthy(&row.required_text("is_nullable")?),
                default: row.text("column_default")?,
                primary_key: false,
            },
        );
    }

    for row in conn.fetch_all(PRIMARY_KEYS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let column = row.required_text("column_name")?;
        if let Some(column) = snapshot.table_mut(&table).columns.get_mut(&column) {
            column.primary_key = true;
        }
    }

    for row in conn.fetch_all(INDEXES_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let definition = row.required_text("definition")?;
        snapshot.table_mut(&table).indexes.insert(
            row.required_text("index_name")?,
            IndexSnapshot {
                unique: definition.to_ascii_uppercase().starts_with("CREATE UNIQUE"),
                columns: Vec::new(),
                definition: Some(definition),
            },
        );
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

    for row in conn.fetch_all(CONSTRAINTS_SQL, &[]).await? {
        let table = row.required_text("table_name")?;
        let kind = row.required_text("constraint_type")?;
        let definition = match row.text("check_clause")? {
            Some(clause) => format!("{} {}", kind, clause),
            None => kind,
        };
        snapshot
            .table_mut(&table)
            .constraints
            .insert(row.required_text("constraint_name")?, definition);
    }

    Ok(snapshot)
}
