use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// An installed extension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescription {
    pub namespace: String,
    pub name: String,
}

pub async fn describe_extensions(db: &Handle) -> Result<Vec<ExtensionDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                e.extname AS name
            FROM pg_catalog.pg_extension e
            JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace
            WHERE
                n.nspname NOT LIKE 'pg_%' AND
                n.nspname != 'information_schema'
            ORDER BY n.nspname, e.extname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(ExtensionDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
        })
    })
}
