use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A SQL or PL/pgSQL function owned by the schema (not by an extension).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub namespace: String,
    pub name: String,
    pub definition: String,
    pub arg_types: Vec<String>,
}

pub async fn describe_functions(db: &Handle) -> Result<Vec<FunctionDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                p.proname AS name,
                pg_get_functiondef(p.oid) AS definition,
                COALESCE(
                    ARRAY(
                        SELECT typ.typname
                        FROM unnest(p.proargtypes) AS t(type_oid)
                        JOIN pg_type typ ON typ.oid = t.type_oid
                    ),
                '{}'::text[]) AS arg_types
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            JOIN pg_language l ON l.oid = p.prolang AND l.lanname IN ('sql', 'plpgsql')
            WHERE
                n.nspname NOT LIKE 'pg_%' AND
                n.nspname != 'information_schema' AND
                -- function is defined outside of any active extension
                NOT EXISTS (SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e')
            ORDER BY
                n.nspname,
                p.proname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(FunctionDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
            definition: row.try_get(2)?,
            arg_types: row.try_get(3)?,
        })
    })
}
