//! # pg-schema-kit
//!
//! A PostgreSQL schema-management toolkit built on two pillars that share
//! one foundation:
//!
//! - **Migrations**: apply and reverse ordered migration definitions with a
//!   durable migration log, advisory-lock coordination across concurrent
//!   runners, and crash-safe handling of `CREATE INDEX CONCURRENTLY`
//!   (which cannot run inside a transaction).
//! - **Drift detection and repair**: introspect a live schema, compare it
//!   to an expected [`SchemaDescription`], and emit ordered DDL that
//!   converges the live schema toward the expected one, respecting
//!   dependencies between views, tables, enums, functions, and triggers.
//!
//! The shared foundation is a composable query/value-binding layer ([`Q`])
//! and a transaction manager with savepoint-based nesting ([`Handle`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_kit::{connect, DatabaseConfig, Handle, RawDefinition, Runner, StaticSource};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_schema_kit::SchemaKitError> {
//!     let config = DatabaseConfig {
//!         host: "localhost".to_string(),
//!         port: 5432,
//!         database: "app".to_string(),
//!         user: "app".to_string(),
//!         password: "hunter2".to_string(),
//!         ssl_mode: "disable".to_string(),
//!     };
//!
//!     let db = Handle::new(connect(&config, 8).await?);
//!     let source = StaticSource::new(vec![RawDefinition {
//!         id: 1,
//!         name: "create users".to_string(),
//!         up_sql: "CREATE TABLE users (id SERIAL PRIMARY KEY);".to_string(),
//!         down_sql: "DROP TABLE users;".to_string(),
//!     }]);
//!
//!     let runner = Runner::new(db, &source)?;
//!     runner.apply_all(&CancellationToken::new()).await
//! }
//! ```

pub mod batch;
pub mod config;
pub mod db;
pub mod describe;
pub mod drift;
pub mod error;
pub mod lock;
pub mod migrate;
pub mod query;
pub mod scan;

// Re-exports for convenient access
pub use batch::BatchInserter;
pub use config::{connect, DatabaseConfig};
pub use db::Handle;
pub use describe::{describe_schema, SchemaDescription};
pub use drift::compare;
pub use error::{Result, SchemaKitError};
pub use lock::{string_key, TransactionalLocker};
pub use migrate::{
    read_migrations, Definition, IndexMetadata, MigrationLog, MigrationSource, RawDefinition,
    Runner, StaticSource,
};
pub use query::{Arg, Args, IntoArg, Q, SqlParam};
