use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A view and its stored definition text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDescription {
    pub namespace: String,
    pub name: String,
    pub definition: String,
}

pub async fn describe_views(db: &Handle) -> Result<Vec<ViewDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                v.schemaname AS namespace,
                v.viewname AS name,
                v.definition AS definition
            FROM pg_catalog.pg_views v
            WHERE
                v.schemaname NOT LIKE 'pg_%' AND
                v.schemaname != 'information_schema'
            ORDER BY v.schemaname, v.viewname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(ViewDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
            definition: row.try_get(2)?,
        })
    })
}
