//! Row-to-value mapping helpers.
//!
//! Shapes: [`first`] (optional leading row), [`slice`] (every row), the
//! single-column conveniences [`value`]/[`values`], and [`Collector`] for
//! accumulating across several scans (e.g. batched `RETURNING` clauses).

use std::sync::{Arc, Mutex};

use tokio_postgres::types::FromSql;
use tokio_postgres::Row;

use crate::error::Result;

/// Map every row through `f`.
pub fn slice<T, F>(rows: Vec<Row>, mut f: F) -> Result<Vec<T>>
where
    F: FnMut(&Row) -> std::result::Result<T, tokio_postgres::Error>,
{
    rows.iter()
        .map(|row| f(row).map_err(Into::into))
        .collect()
}

/// Map the first row through `f`, if any.
pub fn first<T, F>(rows: Vec<Row>, mut f: F) -> Result<Option<T>>
where
    F: FnMut(&Row) -> std::result::Result<T, tokio_postgres::Error>,
{
    match rows.first() {
        Some(row) => Ok(Some(f(row)?)),
        None => Ok(None),
    }
}

/// The first column of every row.
pub fn values<T>(rows: Vec<Row>) -> Result<Vec<T>>
where
    T: for<'a> FromSql<'a>,
{
    slice(rows, |row| row.try_get(0))
}

/// The first column of the first row, if any.
pub fn value<T>(rows: Vec<Row>) -> Result<Option<T>>
where
    T: for<'a> FromSql<'a>,
{
    first(rows, |row| row.try_get(0))
}

/// Accumulates mapped rows across multiple scans. The scanner closure is
/// handed to consumers (such as [`crate::batch::BatchInserter`]) that invoke
/// it once per returned row; collected values are read back afterwards.
pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collector<T> {
    pub fn new() -> Self {
        Collector {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Drain the collected values.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.values.lock().expect("collector lock poisoned"))
    }
}

impl<T: Send + 'static> Collector<T> {
    /// A row scanner that appends the mapped value to this collector.
    pub fn scanner<F>(
        &self,
        mut f: F,
    ) -> impl FnMut(&Row) -> std::result::Result<(), tokio_postgres::Error> + Send + 'static
    where
        F: FnMut(&Row) -> std::result::Result<T, tokio_postgres::Error> + Send + 'static,
    {
        let values = Arc::clone(&self.values);
        move |row| {
            let value = f(row)?;
            values.lock().expect("collector lock poisoned").push(value);
            Ok(())
        }
    }
}
