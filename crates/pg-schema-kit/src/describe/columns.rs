use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{qualified, truthy};
use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A table column. The rendered `data_type` folds in array element types
/// (`text[]`), user-defined type names, and bounded varchar lengths
/// (`character varying(32)`), so two columns compare equal iff their DDL
/// would be identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub character_maximum_length: Option<i32>,
    pub is_identity: bool,
    pub identity_generation: Option<String>,
    pub is_generated: bool,
    pub generation_expression: Option<String>,
}

/// Columns of every base table, keyed by the table's qualified key.
pub(super) async fn describe_columns(
    db: &Handle,
) -> Result<HashMap<String, Vec<ColumnDescription>>> {
    let rows = db
        .query(&Q::raw(
            r#"
            -- information_schema columns are domain types; cast to base
            -- types so rows scan cleanly.
            SELECT
                c.table_schema::text AS namespace,
                c.table_name::text AS table_name,
                c.column_name::text AS name,
                CASE
                    WHEN c.data_type = 'ARRAY' THEN COALESCE((
                        SELECT e.data_type
                        FROM information_schema.element_types e
                        WHERE
                            e.object_type = 'TABLE' AND
                            e.object_catalog = c.table_catalog AND
                            e.object_schema = c.table_schema AND
                            e.object_name = c.table_name AND
                            e.collection_type_identifier = c.dtd_identifier
                    )) || '[]'
                    WHEN c.data_type = 'USER-DEFINED'    THEN c.udt_name
                    WHEN c.character_maximum_length != 0 THEN c.data_type || '(' || c.character_maximum_length::text || ')'
                    ELSE c.data_type
                END::text AS data_type,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS default_value,
                c.character_maximum_length::int4 AS character_maximum_length,
                c.is_identity::text AS is_identity,
                c.identity_generation::text AS identity_generation,
                c.is_generated::text AS is_generated,
                c.generation_expression::text AS generation_expression
            FROM information_schema.columns c
            JOIN information_schema.tables t ON
                t.table_schema = c.table_schema AND
                t.table_name = c.table_name
            WHERE
                t.table_type = 'BASE TABLE' AND
                t.table_schema NOT LIKE 'pg_%' AND
                t.table_schema != 'information_schema'
            ORDER BY c.table_schema, c.table_name, c.column_name
            "#,
        ))
        .await?;

    let columns = scan::slice(rows, |row| {
        let namespace: String = row.try_get(0)?;
        let table_name: String = row.try_get(1)?;
        let is_nullable: String = row.try_get(4)?;
        let is_identity: String = row.try_get(7)?;
        let is_generated: String = row.try_get(9)?;

        Ok((
            qualified(&namespace, &table_name),
            ColumnDescription {
                name: row.try_get(2)?,
                data_type: row.try_get(3)?,
                is_nullable: truthy(&is_nullable),
                default_value: row.try_get(5)?,
                character_maximum_length: row.try_get(6)?,
                is_identity: truthy(&is_identity),
                identity_generation: row.try_get(8)?,
                is_generated: truthy(&is_generated),
                generation_expression: row.try_get(10)?,
            },
        ))
    })?;

    let mut column_map: HashMap<String, Vec<ColumnDescription>> = HashMap::new();
    for (key, column) in columns {
        column_map.entry(key).or_default().push(column);
    }

    Ok(column_map)
}
