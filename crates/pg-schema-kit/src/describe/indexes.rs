use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::qualified;
use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// An index, together with the primary/unique/exclusion constraint backed by
/// it, when one exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_exclusion: bool,
    pub is_deferrable: bool,
    pub index_definition: String,
    pub constraint_type: Option<String>,
    pub constraint_definition: Option<String>,
}

/// Indexes of every table, keyed by the table's qualified key.
pub(super) async fn describe_indexes(
    db: &Handle,
) -> Result<HashMap<String, Vec<IndexDescription>>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                table_class.relname AS table_name,
                index_class.relname AS name,
                i.indisprimary AS is_primary_key,
                i.indisunique AS is_unique,
                i.indisexclusion AS is_exclusion,
                con.condeferrable AS is_deferrable,
                pg_catalog.pg_get_indexdef(i.indexrelid, 0, true) AS index_definition,
                con.contype::text AS constraint_type,
                pg_catalog.pg_get_constraintdef(con.oid, true) AS constraint_definition
            FROM pg_catalog.pg_index i
            JOIN pg_catalog.pg_class table_class ON table_class.oid = i.indrelid
            JOIN pg_catalog.pg_class index_class ON index_class.oid = i.indexrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = table_class.relnamespace
            LEFT OUTER JOIN pg_catalog.pg_constraint con ON
                con.conrelid = i.indrelid AND
                con.conindid = i.indexrelid AND
                con.contype IN ('p', 'u', 'x')
            WHERE
                n.nspname NOT LIKE 'pg_%' AND
                n.nspname != 'information_schema'
            ORDER BY n.nspname, table_class.relname, index_class.relname
            "#,
        ))
        .await?;

    let indexes = scan::slice(rows, |row| {
        let namespace: String = row.try_get(0)?;
        let table_name: String = row.try_get(1)?;
        let is_deferrable: Option<bool> = row.try_get(6)?;

        Ok((
            qualified(&namespace, &table_name),
            IndexDescription {
                name: row.try_get(2)?,
                is_primary_key: row.try_get(3)?,
                is_unique: row.try_get(4)?,
                is_exclusion: row.try_get(5)?,
                is_deferrable: is_deferrable.unwrap_or(false),
                index_definition: row.try_get(7)?,
                constraint_type: row.try_get(8)?,
                constraint_definition: row.try_get(9)?,
            },
        ))
    })?;

    let mut index_map: HashMap<String, Vec<IndexDescription>> = HashMap::new();
    for (key, index) in indexes {
        index_map.entry(key).or_default().push(index);
    }

    Ok(index_map)
}
