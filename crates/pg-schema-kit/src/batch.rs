//! Batched multi-row inserts.
//!
//! PostgreSQL caps a single statement at 65,535 bound parameters. The
//! inserter buffers rows and flushes a multi-row `INSERT .. VALUES` whenever
//! the buffer reaches the largest whole-row batch under that cap.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use tokio_postgres::Row;

use crate::db::Handle;
use crate::error::{Result, SchemaKitError};
use crate::query::{Q, SqlParam};
use crate::scan;

const MAX_PARAMETERS: usize = 65_535;

// Every placeholder is rendered at a fixed width so batch strings can be
// sliced to length instead of rebuilt.
const PLACEHOLDER_WIDTH: usize = 6;

static PLACEHOLDERS: LazyLock<Vec<String>> = LazyLock::new(|| {
    (1..=MAX_PARAMETERS).map(|i| format!("${i:05}")).collect()
});

// Full-capacity placeholder row string per column count, built once.
static PLACEHOLDER_ROWS: LazyLock<Mutex<HashMap<usize, Arc<str>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

type ReturningScanner =
    Box<dyn FnMut(&Row) -> std::result::Result<(), tokio_postgres::Error> + Send>;

/// Accumulates rows for one table and flushes them in maximal batches.
pub struct BatchInserter {
    db: Handle,
    num_columns: usize,
    max_batch_size: usize,
    max_capacity: usize,
    query_prefix: String,
    on_conflict_clause: Option<String>,
    returning_clause: Option<String>,
    returning_scanner: Option<ReturningScanner>,
    placeholders: Arc<str>,
    values: Vec<SqlParam>,
}

impl BatchInserter {
    pub fn new(db: Handle, table_name: &str, column_names: &[&str]) -> BatchInserter {
        let num_columns = column_names.len();
        let max_batch_size = (MAX_PARAMETERS / num_columns) * num_columns;
        let max_capacity = max_batch_size + num_columns;

        let quoted: Vec<String> = column_names.iter().map(|name| quote_column(name)).collect();
        let query_prefix = format!("INSERT INTO {} ({}) VALUES", quote_column(table_name), quoted.join(", "));

        BatchInserter {
            db,
            num_columns,
            max_batch_size,
            max_capacity,
            query_prefix,
            on_conflict_clause: None,
            returning_clause: None,
            returning_scanner: None,
            placeholders: placeholder_rows(num_columns),
            values: Vec::with_capacity(max_capacity),
        }
    }

    /// Append `ON CONFLICT <clause>` to each flushed statement.
    pub fn with_on_conflict(mut self, clause: &str) -> BatchInserter {
        self.on_conflict_clause = Some(format!("ON CONFLICT {clause}"));
        self
    }

    /// Append `RETURNING <columns>` and feed each returned row to `scanner`.
    pub fn with_returning<F>(mut self, columns: &[&str], scanner: F) -> BatchInserter
    where
        F: FnMut(&Row) -> std::result::Result<(), tokio_postgres::Error> + Send + 'static,
    {
        let quoted: Vec<String> = columns.iter().map(|name| quote_column(name)).collect();
        self.returning_clause = Some(format!("RETURNING {}", quoted.join(", ")));
        self.returning_scanner = Some(Box::new(scanner));
        self
    }

    /// Buffer one row, flushing if the buffer has reached a full batch.
    pub async fn insert(&mut self, values: Vec<SqlParam>) -> Result<()> {
        if values.len() != self.num_columns {
            return Err(SchemaKitError::BadInsertArity {
                given: values.len(),
                expected: self.num_columns,
            });
        }

        self.values.extend(values);

        if self.values.len() >= self.max_batch_size {
            return self.flush().await;
        }

        Ok(())
    }

    /// Write out the buffered rows.
    pub async fn flush(&mut self) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }

        let n = self.values.len().min(self.max_batch_size);
        let mut remainder = Vec::with_capacity(self.max_capacity);
        remainder.extend(self.values.drain(n..));
        let batch = std::mem::replace(&mut self.values, remainder);

        let query = self.build_query(batch.len());
        let rows = self.db.query(&Q::raw_with(query, batch)).await?;

        if let Some(scanner) = &mut self.returning_scanner {
            scan::slice(rows, scanner)?;
        }

        Ok(())
    }

    fn build_query(&self, batch_size: usize) -> String {
        let placeholders = &self.placeholders[..placeholders_len(self.num_columns, batch_size)];

        let mut query = format!("{} {}", self.query_prefix, placeholders);
        if let Some(clause) = &self.on_conflict_clause {
            query.push(' ');
            query.push_str(clause);
        }
        if let Some(clause) = &self.returning_clause {
            query.push(' ');
            query.push_str(clause);
        }

        query
    }
}

/// The full-capacity `($00001,$00002),($00003,...)` row string for a column
/// count, memoized process-wide.
fn placeholder_rows(num_columns: usize) -> Arc<str> {
    let mut cache = PLACEHOLDER_ROWS.lock().expect("placeholder cache poisoned");
    if let Some(rows) = cache.get(&num_columns) {
        return Arc::clone(rows);
    }

    let mut buffer = String::with_capacity(MAX_PARAMETERS * (PLACEHOLDER_WIDTH + 2));
    buffer.push('(');
    buffer.push_str(&PLACEHOLDERS[0]);
    for i in 1..MAX_PARAMETERS {
        if i % num_columns == 0 {
            buffer.push_str("),(");
        } else {
            buffer.push(',');
        }
        buffer.push_str(&PLACEHOLDERS[i]);
    }
    buffer.push(')');

    let rows: Arc<str> = Arc::from(buffer.as_str());
    cache.insert(num_columns, Arc::clone(&rows));
    rows
}

/// Byte length of the placeholder-row prefix covering `batch_size` values.
fn placeholders_len(num_columns: usize, batch_size: usize) -> usize {
    let num_rows = batch_size / num_columns;
    // e.g. `($00001,$00002,$00003)`
    let row_len = sequence_len(num_columns, PLACEHOLDER_WIDTH) + 2;
    sequence_len(num_rows, row_len)
}

// Length of `num` items of length `len` joined by one-byte separators.
fn sequence_len(num: usize, len: usize) -> usize {
    num * (len + 1) - 1
}

fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_rows_shape() {
        let rows = placeholder_rows(3);
        assert!(rows.starts_with("($00001,$00002,$00003),($00004,$00005,$00006),"));
        assert!(rows.ends_with(")"));
    }

    #[test]
    fn test_placeholders_len_matches_rendered_prefix() {
        let rows = placeholder_rows(2);

        let two_rows = &rows[..placeholders_len(2, 4)];
        assert_eq!(two_rows, "($00001,$00002),($00003,$00004)");

        let one_row = &rows[..placeholders_len(2, 2)];
        assert_eq!(one_row, "($00001,$00002)");
    }

    #[test]
    fn test_max_batch_size_is_whole_rows() {
        // 65535 / 4 = 16383 rows -> 65532 parameters
        assert_eq!((MAX_PARAMETERS / 4) * 4, 65_532);
    }
}
