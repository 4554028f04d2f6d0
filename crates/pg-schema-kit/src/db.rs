//! A uniform handle over a connection pool, a transaction, or a savepoint.
//!
//! [`Handle`] is cheaply cloneable. The root variant draws pooled
//! connections per operation; a transaction variant pins one connection for
//! its lifetime and serializes access through a mutex; a savepoint shares
//! its parent transaction's connection and overrides only finalization.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use deadpool_postgres::{Object, Pool};
use futures::FutureExt;
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{join_finalize, Result, SchemaKitError};
use crate::query::Q;

/// A database capability: root pool, in-progress transaction, or savepoint.
#[derive(Clone)]
pub struct Handle {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Root(Pool),
    Tx {
        conn: Arc<TxConn>,
        // None for the outermost transaction, `sp_<hex>` for savepoints
        savepoint: Option<String>,
        started: Instant,
    },
}

struct TxConn {
    conn: Mutex<Object>,
}

impl TxConn {
    /// Lock the pinned connection. Contention means the same transaction is
    /// being used from more than one task; that is serialized here and
    /// surfaced as a warning.
    async fn lock(&self) -> MutexGuard<'_, Object> {
        if let Ok(guard) = self.conn.try_lock() {
            return guard;
        }

        let start = Instant::now();
        let guard = self.conn.lock().await;
        warn!(
            waited_ms = start.elapsed().as_millis() as u64,
            "transaction used concurrently"
        );
        guard
    }
}

impl Handle {
    /// Wrap a connection pool as a root handle.
    pub fn new(pool: Pool) -> Handle {
        Handle {
            inner: Inner::Root(pool),
        }
    }

    /// Whether this handle is a transaction or savepoint.
    pub fn is_in_transaction(&self) -> bool {
        matches!(self.inner, Inner::Tx { .. })
    }

    /// Run a query and collect its rows.
    pub async fn query(&self, q: &Q) -> Result<Vec<Row>> {
        match &self.inner {
            Inner::Root(pool) => {
                let conn = acquire(pool, "running query").await?;
                run_query(&conn, q).await
            }
            Inner::Tx { conn, .. } => {
                let guard = conn.lock().await;
                run_query(&guard, q).await
            }
        }
    }

    /// Run a statement, discarding any result rows.
    pub async fn exec(&self, q: &Q) -> Result<()> {
        match &self.inner {
            Inner::Root(pool) => {
                let conn = acquire(pool, "running statement").await?;
                run_exec(&conn, q).await
            }
            Inner::Tx { conn, .. } => {
                let guard = conn.lock().await;
                run_exec(&guard, q).await
            }
        }
    }

    /// Enter a nested scope: `BEGIN` a transaction on a root handle, or
    /// create a savepoint within an existing transaction.
    pub async fn transact(&self) -> Result<Handle> {
        match &self.inner {
            Inner::Root(pool) => {
                let conn = acquire(pool, "beginning transaction").await?;
                conn.batch_execute("BEGIN").await?;
                Ok(Handle {
                    inner: Inner::Tx {
                        conn: Arc::new(TxConn {
                            conn: Mutex::new(conn),
                        }),
                        savepoint: None,
                        started: Instant::now(),
                    },
                })
            }
            Inner::Tx { conn, .. } => {
                let name = format!("sp_{}", Uuid::new_v4().simple());
                // Identifier position: placeholders are not valid here.
                self.exec(&Q::raw(format!("SAVEPOINT {name}"))).await?;
                Ok(Handle {
                    inner: Inner::Tx {
                        conn: conn.clone(),
                        savepoint: Some(name),
                        started: Instant::now(),
                    },
                })
            }
        }
    }

    /// Finalize the scope. `Ok` commits (or releases the savepoint); `Err`
    /// rolls back (or rolls back to the savepoint) and the original error is
    /// joined with any finalization failure. Calling this on a root handle
    /// is ill-formed and yields [`SchemaKitError::NotInTransaction`].
    pub async fn done<T>(self, result: Result<T>) -> Result<T> {
        match &self.inner {
            Inner::Root(_) => match result {
                Ok(_) => Err(SchemaKitError::NotInTransaction),
                Err(err) => Err(SchemaKitError::compose(
                    err,
                    SchemaKitError::NotInTransaction,
                )),
            },
            Inner::Tx {
                savepoint, started, ..
            } => {
                // Identifier position: placeholders are not valid here.
                let statement = match (&result, savepoint) {
                    (Ok(_), None) => "COMMIT".to_string(),
                    (Err(_), None) => "ROLLBACK".to_string(),
                    (Ok(_), Some(name)) => format!("RELEASE {name}"),
                    (Err(_), Some(name)) => format!("ROLLBACK TO {name}"),
                };

                let finalize = self.exec(&Q::raw(statement)).await;
                debug!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok() && finalize.is_ok(),
                    "transaction closed"
                );
                join_finalize(result, finalize)
            }
        }
    }

    /// Run `f` within a nested scope with guaranteed finalization. A panic
    /// inside `f` rolls the scope back with
    /// [`SchemaKitError::PanicDuringTransaction`] and then resumes the
    /// panic.
    pub async fn with_transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Handle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.transact().await?;

        match AssertUnwindSafe(f(tx.clone())).catch_unwind().await {
            Ok(result) => tx.done(result).await,
            Err(panic) => {
                let _ = tx.done::<()>(Err(SchemaKitError::PanicDuringTransaction)).await;
                std::panic::resume_unwind(panic);
            }
        }
    }
}

async fn acquire(pool: &Pool, context: &str) -> Result<Object> {
    pool.get()
        .await
        .map_err(|e| SchemaKitError::pool(e.to_string(), context))
}

async fn run_query(client: &tokio_postgres::Client, q: &Q) -> Result<Vec<Row>> {
    let start = Instant::now();
    let (sql, params) = q.format();
    let result = client.query(sql.as_str(), &params[..]).await;
    log_query(&sql, start, result.is_err());
    result.map_err(Into::into)
}

async fn run_exec(client: &tokio_postgres::Client, q: &Q) -> Result<()> {
    let start = Instant::now();
    let (sql, params) = q.format();
    let result = client.execute(sql.as_str(), &params[..]).await;
    log_query(&sql, start, result.is_err());
    result.map(|_| ()).map_err(Into::into)
}

fn log_query(sql: &str, start: Instant, failed: bool) {
    debug!(
        query = sql,
        duration_ms = start.elapsed().as_millis() as u64,
        failed,
        "sql query executed"
    );
}
