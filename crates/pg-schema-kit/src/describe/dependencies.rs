use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A table column whose type is an enum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDependency {
    pub enum_namespace: String,
    pub enum_name: String,
    pub table_namespace: String,
    pub table_name: String,
    pub column_name: String,
}

pub async fn describe_enum_dependencies(db: &Handle) -> Result<Vec<EnumDependency>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                ns.nspname AS enum_namespace,
                col.udt_name::text AS enum_name,
                col.table_schema::text AS table_namespace,
                col.table_name::text AS table_name,
                col.column_name::text AS column_name
            FROM information_schema.columns col
            JOIN information_schema.tables tab
            ON
                tab.table_schema = col.table_schema AND
                tab.table_name = col.table_name AND
                tab.table_type = 'BASE TABLE'
            JOIN pg_type typ ON col.udt_name = typ.typname
            JOIN pg_namespace ns ON ns.oid = typ.typnamespace
            WHERE
                col.table_schema NOT LIKE 'pg_%' AND
                col.table_schema != 'information_schema' AND
                typ.typtype = 'e'
            ORDER BY col.table_schema, col.table_name, col.ordinal_position
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(EnumDependency {
            enum_namespace: row.try_get(0)?,
            enum_name: row.try_get(1)?,
            table_namespace: row.try_get(2)?,
            table_name: row.try_get(3)?,
            column_name: row.try_get(4)?,
        })
    })
}

/// A view's dependency on a column of a table or another view, recovered
/// from the rewrite rules in `pg_depend`/`pg_rewrite`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDependency {
    /// Table or view whose column is referenced.
    pub used_namespace: String,
    pub used_table_or_view: String,
    pub used_column_name: String,
    /// View doing the referencing.
    pub dependent_namespace: String,
    pub dependent_view: String,
}

pub async fn describe_column_dependencies(db: &Handle) -> Result<Vec<ColumnDependency>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                used_ns.nspname AS used_namespace,
                used_rel.relname AS used_table_or_view,
                pg_attribute.attname AS used_column_name,
                dependent_ns.nspname AS dependent_namespace,
                dependent_view.relname AS dependent_view
            FROM pg_depend
            JOIN pg_rewrite ON pg_depend.objid = pg_rewrite.oid
            JOIN pg_class AS dependent_view ON pg_rewrite.ev_class = dependent_view.oid
            JOIN pg_class AS used_rel ON pg_depend.refobjid = used_rel.oid
            JOIN pg_attribute ON
                pg_depend.refobjid = pg_attribute.attrelid AND
                pg_depend.refobjsubid = pg_attribute.attnum
            JOIN pg_namespace dependent_ns ON dependent_ns.oid = dependent_view.relnamespace
            JOIN pg_namespace used_ns ON used_ns.oid = used_rel.relnamespace
            WHERE
                dependent_ns.nspname NOT LIKE 'pg_%' AND
                dependent_ns.nspname != 'information_schema' AND
                used_ns.nspname NOT LIKE 'pg_%' AND
                used_ns.nspname != 'information_schema'
            ORDER BY dependent_ns.nspname, dependent_view.relname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(ColumnDependency {
            used_namespace: row.try_get(0)?,
            used_table_or_view: row.try_get(1)?,
            used_column_name: row.try_get(2)?,
            dependent_namespace: row.try_get(3)?,
            dependent_view: row.try_get(4)?,
        })
    })
}
