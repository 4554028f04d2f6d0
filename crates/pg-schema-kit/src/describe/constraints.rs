use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::qualified;
use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A table constraint that is not expressed through an index: check (`c`),
/// foreign key (`f`), or constraint trigger (`t`). Primary/unique/exclusion
/// constraints are carried by [`super::IndexDescription`] instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescription {
    pub name: String,
    pub constraint_type: String,
    pub is_deferrable: bool,
    pub referenced_table_name: Option<String>,
    pub definition: String,
}

/// Constraints of every base table, keyed by the table's qualified key.
pub(super) async fn describe_constraints(
    db: &Handle,
) -> Result<HashMap<String, Vec<ConstraintDescription>>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                table_class.relname AS table_name,
                con.conname AS name,
                con.contype::text AS constraint_type,
                con.condeferrable AS is_deferrable,
                reftable_class.relname AS referenced_table_name,
                pg_catalog.pg_get_constraintdef(con.oid, true) AS definition
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class table_class ON table_class.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = table_class.relnamespace
            LEFT OUTER JOIN pg_catalog.pg_class reftable_class ON reftable_class.oid = con.confrelid
            WHERE
                n.nspname NOT LIKE 'pg_%' AND
                n.nspname != 'information_schema' AND
                con.contype IN ('c', 'f', 't')
            ORDER BY
                n.nspname,
                table_class.relname,
                con.conname
            "#,
        ))
        .await?;

    let constraints = scan::slice(rows, |row| {
        let namespace: String = row.try_get(0)?;
        let table_name: String = row.try_get(1)?;

        Ok((
            qualified(&namespace, &table_name),
            ConstraintDescription {
                name: row.try_get(2)?,
                constraint_type: row.try_get(3)?,
                is_deferrable: row.try_get(4)?,
                referenced_table_name: row.try_get(5)?,
                definition: row.try_get(6)?,
            },
        ))
    })?;

    let mut constraint_map: HashMap<String, Vec<ConstraintDescription>> = HashMap::new();
    for (key, constraint) in constraints {
        constraint_map.entry(key).or_default().push(constraint);
    }

    Ok(constraint_map)
}
