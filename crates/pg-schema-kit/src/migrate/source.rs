//! Migration definitions and their validation.
//!
//! A [`MigrationSource`] yields raw `(id, name, up, down)` definitions from
//! wherever they live; the core sorts them by identifier, rejects
//! duplicates, and classifies index-creating migrations so the runner can
//! route them through the concurrent-index protocol.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SchemaKitError};
use crate::query::Q;

/// An unvalidated migration definition as produced by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDefinition {
    pub id: i32,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// A validated, ordered migration definition.
#[derive(Clone, Debug)]
pub struct Definition {
    pub id: i32,
    pub name: String,
    pub up_query: Q,
    pub down_query: Q,
    pub index_metadata: Option<IndexMetadata>,
}

/// The index and table named by a single-statement index-creating `up`
/// migration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMetadata {
    pub table_name: String,
    pub index_name: String,
}

/// Yields an unordered collection of raw migration definitions.
pub trait MigrationSource {
    fn read_all(&self) -> Result<Vec<RawDefinition>>;
}

/// A source over an in-memory definition list.
pub struct StaticSource {
    definitions: Vec<RawDefinition>,
}

impl StaticSource {
    pub fn new(definitions: Vec<RawDefinition>) -> StaticSource {
        StaticSource { definitions }
    }
}

impl MigrationSource for StaticSource {
    fn read_all(&self) -> Result<Vec<RawDefinition>> {
        Ok(self.definitions.clone())
    }
}

// Matches CREATE [UNIQUE] INDEX [CONCURRENTLY] [IF NOT EXISTS] <index> ON
// [ONLY] <table>, capturing the index and table identifiers (unquoted or
// double-quoted). Plain CREATE INDEX matches too: any single-statement
// index build goes through the index protocol.
static CREATE_INDEX_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?([a-zA-Z0-9$_]+|"[^"]+")\s+ON\s+(?:ONLY\s+)?([a-zA-Z0-9$_]+|"[^"]+")"#,
    )
    .expect("create index pattern is valid")
});

static CREATE_INDEX_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(?:[a-zA-Z0-9$_]+|"[^"]+")\s+ON\s+(?:ONLY\s+)?(?:[a-zA-Z0-9$_]+|"[^"]+")[^;]+;"#,
    )
    .expect("create index statement pattern is valid")
});

/// Read, sort, and validate migration definitions.
pub fn read_migrations(source: &dyn MigrationSource) -> Result<Vec<Definition>> {
    let mut raw_definitions = source.read_all()?;
    raw_definitions.sort_by_key(|raw| raw.id);

    let mut ids = HashSet::new();
    let mut definitions = Vec::with_capacity(raw_definitions.len());

    for raw in raw_definitions {
        if !ids.insert(raw.id) {
            return Err(SchemaKitError::DuplicateMigrationId(raw.id));
        }

        let pruned_up = remove_comments(&raw.up_sql);
        let pruned_down = remove_comments(&raw.down_sql);

        let index_metadata = match CREATE_INDEX_HEAD.captures(&pruned_up) {
            Some(captures) => {
                let remainder = CREATE_INDEX_STATEMENT.replace_all(&pruned_up, "");
                if !remainder.trim().is_empty() {
                    return Err(SchemaKitError::InvalidMigration(
                        r#""create index concurrently" is not the only statement in the up migration"#
                            .to_string(),
                    ));
                }

                Some(IndexMetadata {
                    index_name: captures[1].to_string(),
                    table_name: captures[2].to_string(),
                })
            }
            None => None,
        };

        if CREATE_INDEX_HEAD.is_match(&pruned_down) {
            return Err(SchemaKitError::InvalidMigration(
                r#""create index concurrently" is not allowed in down migrations"#.to_string(),
            ));
        }

        definitions.push(Definition {
            id: raw.id,
            name: raw.name,
            up_query: Q::raw(raw.up_sql),
            down_query: Q::raw(raw.down_sql),
            index_metadata,
        });
    }

    Ok(definitions)
}

/// Strip `--` line comments and blank lines before classification.
fn remove_comments(query: &str) -> String {
    query
        .lines()
        .filter_map(|line| {
            let line = line.split("--").next().unwrap_or_default().trim();
            (!line.is_empty()).then(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
