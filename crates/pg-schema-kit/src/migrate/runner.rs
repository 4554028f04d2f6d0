//! The migration runner.
//!
//! Applies and reverses migrations under an advisory DDL lock, persisting a
//! log row per attempt in `migration_logs`. Index-creating migrations run
//! outside both the lock and any transaction (PostgreSQL forbids
//! `CREATE INDEX CONCURRENTLY` in a transaction block, and holding the
//! transactional advisory lock across one would deadlock the lock
//! machinery), coordinated instead through a poll/adopt/race protocol over
//! `pg_index` and `pg_stat_progress_create_index`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::args;
use crate::db::Handle;
use crate::error::{join_finalize, Result, SchemaKitError};
use crate::lock::{string_key, TransactionalLocker};
use crate::migrate::source::{read_migrations, Definition, MigrationSource};
use crate::query::Q;
use crate::scan;

/// Advisory lock namespace for all runner coordination.
const LOCK_NAMESPACE: &str = "pg-schema-kit.migration-runner";

/// Sub-lock serializing DDL application.
const DDL_LOCK_KEY: &str = "ddl";

/// Sub-lock serializing migration-log adoption during index validation.
const LOG_LOCK_KEY: &str = "log";

/// How long between index-progress polls.
const INDEX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often a running index build refreshes its log heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A log whose heartbeat is older than this belongs to a dead runner.
const HEARTBEAT_STALE_AFTER_SECS: i64 = 15;

/// Applies and reverses an ordered set of migration definitions.
pub struct Runner {
    db: Handle,
    definitions: Vec<Definition>,
    locker: TransactionalLocker,
}

/// The latest recorded outcome for one migration.
#[derive(Clone, Debug)]
pub struct MigrationLog {
    pub migration_id: i32,
    pub reverse: bool,
    pub success: Option<bool>,
    pub error_message: Option<String>,
}

impl Runner {
    /// Read definitions from `source` and build a runner over `db` (which
    /// must be a root handle).
    pub fn new(db: Handle, source: &dyn MigrationSource) -> Result<Runner> {
        let definitions = read_migrations(source)?;
        let locker = TransactionalLocker::new(db.clone(), string_key(LOCK_NAMESPACE))?;

        Ok(Runner {
            db,
            definitions,
            locker,
        })
    }

    /// The ordered definition list, for read-only inspection.
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// Apply every unapplied migration, in order.
    pub async fn apply_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.apply_slice(cancel, &self.definitions).await
    }

    /// Apply unapplied migrations up to and including `id`.
    pub async fn apply(&self, cancel: &CancellationToken, id: i32) -> Result<()> {
        let position = self
            .definitions
            .iter()
            .position(|definition| definition.id == id)
            .ok_or(SchemaKitError::MigrationNotFound(id))?;

        self.apply_slice(cancel, &self.definitions[..=position]).await
    }

    async fn apply_slice(&self, cancel: &CancellationToken, definitions: &[Definition]) -> Result<()> {
        self.ensure_migration_logs_table().await?;

        loop {
            let (up_to_date, index_definition) =
                self.apply_definitions(cancel, definitions, false).await?;
            if up_to_date {
                return Ok(());
            }

            if let Some(definition) = index_definition {
                self.apply_concurrent_index_creation(cancel, &definition)
                    .await?;
            }
        }
    }

    /// Reverse applied migrations with identifiers >= `id`, newest first.
    pub async fn undo(&self, cancel: &CancellationToken, id: i32) -> Result<()> {
        let position = self
            .definitions
            .iter()
            .position(|definition| definition.id == id)
            .ok_or(SchemaKitError::MigrationNotFound(id))?;

        self.ensure_migration_logs_table().await?;

        let mut definitions = self.definitions[position..].to_vec();
        definitions.reverse();

        // Index-creating migrations are illegal in down migrations, so the
        // whole reversal happens under the lock in one pass.
        self.apply_definitions(cancel, &definitions, true)
            .await
            .map(|_| ())
    }

    /// Idempotently create `migration_logs` and every column it has grown
    /// over time.
    async fn ensure_migration_logs_table(&self) -> Result<()> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS migration_logs(id SERIAL PRIMARY KEY)",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS migration_id integer NOT NULL",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS reverse bool NOT NULL",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS started_at timestamptz NOT NULL DEFAULT current_timestamp",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS last_heartbeat_at timestamptz",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS finished_at timestamptz",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS success boolean",
            "ALTER TABLE migration_logs ADD COLUMN IF NOT EXISTS error_message text",
        ] {
            self.db.exec(&Q::raw(statement)).await?;
        }

        Ok(())
    }

    /// Run every selected migration in order under the DDL lock. Returns
    /// `(up_to_date, index_definition)`: an index-creating definition breaks
    /// out of the locked region to be handled by the caller, after which the
    /// applied set is recomputed from scratch.
    async fn apply_definitions(
        &self,
        cancel: &CancellationToken,
        definitions: &[Definition],
        reverse: bool,
    ) -> Result<(bool, Option<Definition>)> {
        self.locker
            .with_lock(string_key(DDL_LOCK_KEY), |_tx| async move {
                let migration_logs = self.migration_logs().await?;

                let applied: Vec<i32> = migration_logs
                    .values()
                    .filter(|log| log.success == Some(true) && !log.reverse)
                    .map(|log| log.migration_id)
                    .collect();

                let to_apply: Vec<&Definition> =
                    select_definitions(definitions, &applied, reverse);

                if to_apply.is_empty() {
                    info!("Migrations are in expected state");
                    return Ok((true, None));
                }

                for definition in to_apply {
                    if cancel.is_cancelled() {
                        return Err(SchemaKitError::Cancelled);
                    }

                    if definition.index_metadata.is_some() && !reverse {
                        // Cannot build the index while holding the lock;
                        // hand it back to run outside this locked region.
                        return Ok((false, Some(definition.clone())));
                    }

                    let direction = if reverse { "down" } else { "up" };
                    self.with_migration_log(definition, reverse, |_log_id| async move {
                        info!(
                            id = definition.id,
                            name = %definition.name,
                            direction,
                            "Applying migration"
                        );

                        let query = if reverse {
                            &definition.down_query
                        } else {
                            &definition.up_query
                        };

                        if let Err(err) = self
                            .db
                            .with_transaction(|tx| async move { tx.exec(query).await })
                            .await
                        {
                            error!(
                                id = definition.id,
                                name = %definition.name,
                                direction,
                                error = %err,
                                "Failed to apply migration"
                            );
                            return Err(err);
                        }

                        Ok(())
                    })
                    .await?;
                }

                Ok((false, None))
            })
            .await
    }

    /// Drive one index-creating migration to a recorded outcome.
    ///
    /// The state space is (index exists, is valid, build in progress,
    /// log state); the loop walks it until the index is valid with a
    /// success log, adopting builds started by other runners and retrying
    /// after losing a creation race.
    async fn apply_concurrent_index_creation(
        &self,
        cancel: &CancellationToken,
        definition: &Definition,
    ) -> Result<()> {
        let metadata = definition
            .index_metadata
            .as_ref()
            .expect("definition was classified as index-creating");

        info!(
            id = definition.id,
            name = %definition.name,
            table_name = %metadata.table_name,
            index_name = %metadata.index_name,
            "Handling concurrent index creation"
        );

        let mut first = true;
        loop {
            if !first {
                wait(cancel, INDEX_POLL_INTERVAL).await?;
            }
            first = false;

            if let Some(status) = self
                .index_status(&metadata.table_name, &metadata.index_name)
                .await?
            {
                info!(
                    phase = status.phase.as_deref().unwrap_or_default(),
                    lockers_total = status.lockers_total.unwrap_or_default(),
                    lockers_done = status.lockers_done.unwrap_or_default(),
                    blocks_total = status.blocks_total.unwrap_or_default(),
                    blocks_done = status.blocks_done.unwrap_or_default(),
                    tuples_total = status.tuples_total.unwrap_or_default(),
                    tuples_done = status.tuples_done.unwrap_or_default(),
                    "Index exists"
                );

                if status.is_valid {
                    info!("Index is valid");

                    if self.handle_valid_index(definition).await? {
                        continue;
                    }
                    return Ok(());
                }

                if status.phase.is_some() {
                    // Another session is building it; poll until it
                    // becomes valid or the build dies.
                    continue;
                }

                info!("Dropping invalid index");

                // Identifier position: placeholders are not valid here.
                self.db
                    .exec(&Q::raw(format!(
                        "DROP INDEX IF EXISTS {}",
                        metadata.index_name
                    )))
                    .await?;
            }

            info!("Creating index");

            if self.create_index_concurrently(cancel, definition).await? {
                // Lost the creation race; re-enter the poll loop to adopt
                // the winner's index.
                continue;
            }

            return Ok(());
        }
    }

    /// The index is valid; make sure exactly one success log records it.
    /// Returns true when the outer loop must re-check (a stale in-progress
    /// log from a dead runner).
    async fn handle_valid_index(&self, definition: &Definition) -> Result<bool> {
        let definition_id = definition.id;

        self.locker
            .with_lock(string_key(LOG_LOCK_KEY), |tx| async move {
                let log = log_for_concurrent_index(&tx, definition_id).await?;

                let log = match log {
                    Some(log) => log,
                    None => {
                        // Index was created outside the runner; adopt it.
                        tx.exec(&Q::new(
                            "
                            INSERT INTO migration_logs (migration_id, reverse, finished_at, success)
                            VALUES ({:id}, false, current_timestamp, true)
                            ",
                            args! { "id" => definition_id },
                        ))
                        .await?;

                        return Ok(false);
                    }
                };

                match log.success {
                    Some(true) => return Ok(false),
                    Some(false) => {
                        return Err(SchemaKitError::MigrationFailed(
                            log.error_message.unwrap_or_default(),
                        ));
                    }
                    None => {}
                }

                if Utc::now().signed_duration_since(log.last_heartbeat_at)
                    >= chrono::Duration::seconds(HEARTBEAT_STALE_AFTER_SECS)
                {
                    // The runner that owned this log died mid-build.
                    return Ok(true);
                }

                tx.exec(&Q::new(
                    "
                    UPDATE migration_logs
                    SET success = true, finished_at = current_timestamp
                    WHERE id = {:id}
                    ",
                    args! { "id" => log.id },
                ))
                .await?;

                Ok(false)
            })
            .await
    }

    /// Build the index outside any transaction, heartbeating the log row
    /// while the build runs. Returns true when another runner won the
    /// creation race.
    async fn create_index_concurrently(
        &self,
        cancel: &CancellationToken,
        definition: &Definition,
    ) -> Result<bool> {
        self.with_migration_log(definition, false, |log_id| async move {
            let heartbeat_token = cancel.child_token();
            let _heartbeat_guard = heartbeat_token.clone().drop_guard();
            tokio::spawn(heartbeat(self.db.clone(), log_id, heartbeat_token));

            if let Err(err) = self.db.exec(&definition.up_query).await {
                if !is_duplicate_relation(&err) {
                    return Err(err);
                }

                // Another process created the index between our status
                // check and this statement. Drop our log row so the
                // validation pass records exactly one success.
                self.db
                    .exec(&Q::new(
                        "DELETE FROM migration_logs WHERE id = {:id}",
                        args! { "id" => log_id },
                    ))
                    .await?;

                return Ok(true);
            }

            Ok(false)
        })
        .await
    }

    /// The latest log per migration identifier.
    pub async fn migration_logs(&self) -> Result<BTreeMap<i32, MigrationLog>> {
        self.ensure_migration_logs_table().await?;

        let rows = self
            .db
            .query(&Q::raw(
                "
                WITH ranked_migration_logs AS (
                    SELECT
                        l.*,
                        ROW_NUMBER() OVER (PARTITION BY migration_id ORDER BY started_at DESC) AS rank
                    FROM migration_logs l
                )
                SELECT
                    migration_id,
                    reverse,
                    success,
                    error_message
                FROM ranked_migration_logs
                WHERE rank = 1
                ORDER BY migration_id
                ",
            ))
            .await?;

        let logs = scan::slice(rows, |row| {
            Ok(MigrationLog {
                migration_id: row.try_get(0)?,
                reverse: row.try_get(1)?,
                success: row.try_get(2)?,
                error_message: row.try_get(3)?,
            })
        })?;

        Ok(logs
            .into_iter()
            .map(|log| (log.migration_id, log))
            .collect())
    }

    /// Record a successful migration log for `id` without running anything.
    /// An operator escape hatch for reconciling state managed out-of-band.
    pub async fn write_migration_log(&self, id: i32) -> Result<()> {
        self.ensure_migration_logs_table().await?;

        let definition = self
            .definitions
            .iter()
            .find(|definition| definition.id == id)
            .ok_or(SchemaKitError::MigrationNotFound(id))?;

        self.with_migration_log(definition, false, |_log_id| async move {
            info!(id, "Forcing writing migration log");
            Ok(())
        })
        .await
    }

    /// Insert a log row for the attempt, run `f`, and finalize the row with
    /// the outcome. On error the message is stored verbatim; a finalization
    /// failure is joined onto the operation's result.
    async fn with_migration_log<T, F, Fut>(
        &self,
        definition: &Definition,
        reverse: bool,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(i32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let rows = self
            .db
            .query(&Q::new(
                "
                INSERT INTO migration_logs (migration_id, reverse)
                VALUES ({:id}, {:reverse})
                RETURNING id
                ",
                args! { "id" => definition.id, "reverse" => reverse },
            ))
            .await?;
        let log_id: i32 = scan::value(rows)?.ok_or_else(|| {
            SchemaKitError::Config("migration log insert returned no row".to_string())
        })?;

        let result = f(log_id).await;

        let finalize = self
            .db
            .exec(&Q::new(
                "
                UPDATE migration_logs
                SET
                    finished_at = current_timestamp,
                    success = {:success},
                    error_message = {:error_message}
                WHERE id = {:id}
                ",
                args! {
                    "success" => result.is_ok(),
                    "error_message" => result.as_ref().err().map(|err| err.to_string()),
                    "id" => log_id,
                },
            ))
            .await;

        join_finalize(result, finalize)
    }

    async fn index_status(
        &self,
        table_name: &str,
        index_name: &str,
    ) -> Result<Option<IndexStatus>> {
        let rows = self
            .db
            .query(&Q::new(
                "
                SELECT
                    index.indisvalid,
                    progress.phase,
                    progress.lockers_total,
                    progress.lockers_done,
                    progress.blocks_total,
                    progress.blocks_done,
                    progress.tuples_total,
                    progress.tuples_done
                FROM pg_catalog.pg_class table_class
                JOIN pg_catalog.pg_index index ON index.indrelid = table_class.oid
                JOIN pg_catalog.pg_class index_class ON index_class.oid = index.indexrelid
                LEFT JOIN pg_catalog.pg_stat_progress_create_index progress ON
                    progress.relid = table_class.oid AND
                    progress.index_relid = index_class.oid
                WHERE
                    table_class.relname = {:table_name} AND
                    index_class.relname = {:index_name}
                ",
                args! { "table_name" => table_name, "index_name" => index_name },
            ))
            .await?;

        scan::first(rows, |row| {
            Ok(IndexStatus {
                is_valid: row.try_get(0)?,
                phase: row.try_get(1)?,
                lockers_total: row.try_get(2)?,
                lockers_done: row.try_get(3)?,
                blocks_total: row.try_get(4)?,
                blocks_done: row.try_get(5)?,
                tuples_total: row.try_get(6)?,
                tuples_done: row.try_get(7)?,
            })
        })
    }
}

/// Select definitions whose applied-state does not match the direction:
/// unapplied ones for apply, applied ones for undo.
fn select_definitions<'d>(
    definitions: &'d [Definition],
    applied: &[i32],
    reverse: bool,
) -> Vec<&'d Definition> {
    definitions
        .iter()
        .filter(|definition| applied.contains(&definition.id) == reverse)
        .collect()
}

/// Refresh `last_heartbeat_at` until cancelled. Cancellation is the normal
/// way this task ends and is not an error.
async fn heartbeat(db: Handle, log_id: i32, token: CancellationToken) {
    loop {
        if let Err(err) = db
            .exec(&Q::new(
                "
                UPDATE migration_logs
                SET last_heartbeat_at = current_timestamp
                WHERE id = {:id}
                ",
                args! { "id" => log_id },
            ))
            .await
        {
            if !token.is_cancelled() {
                error!(error = %err, "Failed to update heartbeat");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
            _ = token.cancelled() => return,
        }
    }
}

struct IndexStatus {
    is_valid: bool,
    phase: Option<String>,
    lockers_total: Option<i64>,
    lockers_done: Option<i64>,
    blocks_total: Option<i64>,
    blocks_done: Option<i64>,
    tuples_total: Option<i64>,
    tuples_done: Option<i64>,
}

struct ConcurrentIndexLog {
    id: i32,
    success: Option<bool>,
    error_message: Option<String>,
    last_heartbeat_at: DateTime<Utc>,
}

/// The most recent non-reverse log for one migration, with the heartbeat
/// falling back to the start time.
async fn log_for_concurrent_index(db: &Handle, id: i32) -> Result<Option<ConcurrentIndexLog>> {
    let rows = db
        .query(&Q::new(
            "
            WITH ranked_migration_logs AS (
                SELECT
                    l.*,
                    ROW_NUMBER() OVER (ORDER BY started_at DESC) AS rank
                FROM migration_logs l
                WHERE migration_id = {:id}
            )
            SELECT
                id,
                success,
                error_message,
                COALESCE(last_heartbeat_at, started_at)
            FROM ranked_migration_logs
            WHERE rank = 1 AND NOT reverse
            ",
            args! { "id" => id },
        ))
        .await?;

    scan::first(rows, |row| {
        Ok(ConcurrentIndexLog {
            id: row.try_get(0)?,
            success: row.try_get(1)?,
            error_message: row.try_get(2)?,
            last_heartbeat_at: row.try_get(3)?,
        })
    })
}

fn is_duplicate_relation(err: &SchemaKitError) -> bool {
    matches!(
        err,
        SchemaKitError::Database(db_err)
            if db_err.code() == Some(&tokio_postgres::error::SqlState::DUPLICATE_TABLE)
    )
}

/// Sleep that also wakes on cancellation.
async fn wait(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(SchemaKitError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: i32) -> Definition {
        Definition {
            id,
            name: format!("migration_{id}"),
            up_query: Q::raw("SELECT 1"),
            down_query: Q::raw("SELECT 1"),
            index_metadata: None,
        }
    }

    #[test]
    fn test_select_definitions_apply_skips_applied() {
        let definitions: Vec<Definition> = (1..=5).map(definition).collect();

        let selected = select_definitions(&definitions, &[1, 2], false);
        let ids: Vec<i32> = selected.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_select_definitions_undo_requires_applied() {
        // Undo walks newest-first over definitions at or above the target;
        // an unapplied hole (4 here) is skipped.
        let mut definitions: Vec<Definition> = (1..=7).map(definition).collect();
        definitions.reverse();

        let applied = [1, 2, 3, 5, 6, 7];
        let selected = select_definitions(&definitions, &applied, true);
        let ids: Vec<i32> = selected.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![7, 6, 5, 3, 2, 1]);
    }

    #[test]
    fn test_select_definitions_fresh_database() {
        let definitions: Vec<Definition> = (1..=3).map(definition).collect();

        let selected = select_definitions(&definitions, &[], false);
        assert_eq!(selected.len(), 3);

        let selected = select_definitions(&definitions, &[], true);
        assert!(selected.is_empty());
    }
}
