use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;
use crate::query::Q;
use crate::scan;

/// A sequence with its full attribute set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDescription {
    pub namespace: String,
    pub name: String,
    pub data_type: String,
    pub start_value: i64,
    pub minimum_value: i64,
    pub maximum_value: i64,
    pub increment: i64,
    pub cycle_option: String,
}

pub async fn describe_sequences(db: &Handle) -> Result<Vec<SequenceDescription>> {
    // information_schema renders these attributes as domain-typed character
    // data; cast to base types so they scan cleanly.
    let rows = db
        .query(&Q::raw(
            r#"
            SELECT
                s.sequence_schema::text AS namespace,
                s.sequence_name::text AS name,
                s.data_type::text AS data_type,
                s.start_value::bigint AS start_value,
                s.minimum_value::bigint AS minimum_value,
                s.maximum_value::bigint AS maximum_value,
                s.increment::bigint AS increment,
                s.cycle_option::text AS cycle_option
            FROM information_schema.sequences s
            WHERE
                s.sequence_schema NOT LIKE 'pg_%' AND
                s.sequence_schema != 'information_schema'
            ORDER BY s.sequence_schema, s.sequence_name
            "#,
        ))
        .await?;

    scan::slice(rows, |row| {
        Ok(SequenceDescription {
            namespace: row.try_get(0)?,
            name: row.try_get(1)?,
            data_type: row.try_get(2)?,
            start_value: row.try_get(3)?,
            minimum_value: row.try_get(4)?,
            maximum_value: row.try_get(5)?,
            increment: row.try_get(6)?,
            cycle_option: row.try_get(7)?,
        })
    })
}
