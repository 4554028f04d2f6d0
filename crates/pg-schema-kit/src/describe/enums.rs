use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// An enum type with its labels in sort order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDescription {
    pub namespace: String,
    pub name: String,
    pub labels: Vec<String>,
}

pub async fn describe_enums(db: &Handle) -> Result<Vec<EnumDescription>> {
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                n.nspname AS namespace,
                t.typname AS name,
                array_agg(e.enumlabel ORDER BY e.enumsortorder) AS labels
            FROM pg_catalog.pg_enum e
            JOIN pg_catalog.pg_type t ON t.oid = e.enumtypid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
            GROUP BY n.nspname, t.typname
            ORDER BY n.nspname, t.typname
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(EnumDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
            labels: row.try_get(2)?,
        })
    })
}
