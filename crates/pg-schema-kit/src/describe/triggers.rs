use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A non-internal trigger, with the namespace of the function it invokes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDescription {
    pub namespace: String,
    pub name: String,
    pub table_name: String,
    pub function_namespace: String,
    pub definition: String,
}

pub async fn describe_triggers(db: &Handle) -> Result<Vec<TriggerDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                t.tgname AS name,
                c.relname AS table_name,
                tn.nspname AS function_namespace,
                pg_catalog.pg_get_triggerdef(t.oid, true) AS definition
            FROM pg_catalog.pg_trigger t
            JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_proc p ON p.oid = t.tgfoid
            JOIN pg_catalog.pg_namespace tn ON tn.oid = p.pronamespace
            WHERE NOT t.tgisinternal
            ORDER BY n.nspname, t.tgname, c.relname, tn.nspname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(TriggerDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
            table_name: row.try_get(2)?,
            function_namespace: row.try_get(3)?,
            definition: row.try_get(4)?,
        })
    })
}
