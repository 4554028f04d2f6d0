use serde::{Deserialize, Serialize};

use super::columns::describe_columns;
use super::constraints::describe_constraints;
use super::indexes::describe_indexes;
use super::{qualified, ColumnDescription, ConstraintDescription, IndexDescription};
use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A base table with its columns, constraints, and indexes.
///
/// Table identity is `(namespace, name)` only; the children are diffed as
/// separate object kinds by the comparator, so [`TableDescription::same_identity`]
/// intentionally ignores them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub namespace: String,
    pub name: String,
    pub columns: Vec<ColumnDescription>,
    pub constraints: Vec<ConstraintDescription>,
    pub indexes: Vec<IndexDescription>,
}

impl TableDescription {
    /// Shallow comparison: do these describe the same table object?
    pub fn same_identity(&self, other: &TableDescription) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

pub async fn describe_tables(db: &Handle) -> Result<Vec<TableDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                t.table_schema::text AS namespace,
                t.table_name::text AS name
            FROM information_schema.tables t
            WHERE
                t.table_type = 'BASE TABLE' AND
                t.table_schema NOT LIKE 'pg_%' AND
                t.table_schema != 'information_schema'
            ORDER BY t.table_schema, t.table_name
            "#,
        ))
        .await?;

    let tables: Vec<(String, String)> = scan::slice(rows, |row| {
        Ok((row.try_get(0)?, row.try_get(1)?))
    })?;

    let mut column_map = describe_columns(db).await?;
    let mut constraint_map = describe_constraints(db).await?;
    let mut index_map = describe_indexes(db).await?;

    Ok(tables
        .into_iter()
        .map(|(namespace, name)| {
            let key = qualified(&namespace, &name);

            TableDescription {
                columns: column_map.remove(&key).unwrap_or_default(),
                constraints: constraint_map.remove(&key).unwrap_or_default(),
                indexes: index_map.remove(&key).unwrap_or_default(),
                namespace,
                name,
            }
        })
        .collect())
}
