//! Schema drift comparison.
//!
//! [`compare`] diffs an expected [`SchemaDescription`] against an observed
//! one and emits the DDL that converges the observed schema toward the
//! expected one. Each object kind supplies a [`Modifier`] describing how to
//! create, drop, and (where supported) alter objects of that kind; the
//! comparator partitions both sides by key, emits per-kind statements, and
//! flushes them in dependency order.

mod columns;
mod constraints;
mod enums;
mod extensions;
mod functions;
mod indexes;
mod sequences;
mod tables;
mod triggers;
mod views;

use std::collections::{BTreeMap, BTreeSet};

use crate::describe::{qualified, SchemaDescription};

/// What a DDL statement does to its object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum StatementType {
    Create,
    Drop,
    Replace,
}

/// The kind of schema object a DDL statement addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ObjectType {
    Extension,
    Enum,
    Function,
    Table,
    Sequence,
    Column,
    Constraint,
    Index,
    View,
    Trigger,
}

/// One or more SQL statements addressing a single object.
#[derive(Clone, Debug)]
pub(crate) struct DdlStatement {
    pub key: String,
    pub statement_type: StatementType,
    pub object_type: ObjectType,
    pub statements: Vec<String>,
}

impl DdlStatement {
    pub(crate) fn new(
        key: String,
        statement_type: StatementType,
        object_type: ObjectType,
        statements: Vec<String>,
    ) -> DdlStatement {
        DdlStatement {
            key,
            statement_type,
            object_type,
            statements,
        }
    }
}

/// Per-kind adapter over one description entity.
pub(crate) trait Modifier {
    type Desc: PartialEq;

    fn key(&self) -> String;
    fn object_type(&self) -> ObjectType;
    fn description(&self) -> &Self::Desc;
    fn create_sql(&self) -> String;
    fn drop_sql(&self) -> String;

    /// Whether the expected object already matches the existing one. Kinds
    /// whose children are diffed separately (tables) override this with a
    /// shallow identity check.
    fn unchanged(&self, existing: &Self::Desc) -> bool {
        self.description() == existing
    }

    /// Produce in-place alteration statements for a changed object, or
    /// `None` to fall back to drop-and-recreate.
    fn alter_existing(
        &self,
        observed_schema: &SchemaDescription,
        existing: &Self::Desc,
    ) -> Option<Vec<DdlStatement>> {
        let _ = (observed_schema, existing);
        None
    }
}

/// Compute the ordered DDL statements that converge `observed` toward
/// `expected`.
pub fn compare(expected: &SchemaDescription, observed: &SchemaDescription) -> Vec<String> {
    let mut statements = Vec::new();

    statements.extend(compare_objects(
        observed,
        &extensions::modifiers(expected),
        &extensions::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &enums::modifiers(expected),
        &enums::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &functions::modifiers(expected),
        &functions::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &tables::modifiers(expected),
        &tables::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &sequences::modifiers(expected),
        &sequences::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &columns::modifiers(expected),
        &columns::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &constraints::modifiers(expected),
        &constraints::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &indexes::modifiers(expected),
        &indexes::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &views::modifiers(expected),
        &views::modifiers(observed),
    ));
    statements.extend(compare_objects(
        observed,
        &triggers::modifiers(expected),
        &triggers::modifiers(observed),
    ));

    // Deduplicate: enum rebuilds emit view drop/create statements that may
    // coincide with the normal view diff.
    let mut unique: BTreeMap<(StatementType, ObjectType, String), DdlStatement> = BTreeMap::new();
    for statement in statements {
        let key = (
            statement.statement_type,
            statement.object_type,
            statement.key.clone(),
        );
        unique.insert(key, statement);
    }

    flush_ordered(unique, expected, observed)
}

fn compare_objects<M: Modifier>(
    observed_schema: &SchemaDescription,
    expected: &[M],
    observed: &[M],
) -> Vec<DdlStatement> {
    let (missing, additional, common) = partition(expected, observed);
    let mut statements = Vec::new();

    for modifier in missing {
        statements.push(DdlStatement::new(
            modifier.key(),
            StatementType::Create,
            modifier.object_type(),
            vec![modifier.create_sql()],
        ));
    }

    for modifier in additional {
        statements.push(DdlStatement::new(
            modifier.key(),
            StatementType::Drop,
            modifier.object_type(),
            vec![modifier.drop_sql()],
        ));
    }

    for (expected_modifier, observed_modifier) in common {
        let existing = observed_modifier.description();
        if expected_modifier.unchanged(existing) {
            continue;
        }

        if let Some(alterations) = expected_modifier.alter_existing(observed_schema, existing) {
            statements.extend(alterations);
            continue;
        }

        statements.push(DdlStatement::new(
            observed_modifier.key(),
            StatementType::Drop,
            observed_modifier.object_type(),
            vec![observed_modifier.drop_sql()],
        ));
        statements.push(DdlStatement::new(
            expected_modifier.key(),
            StatementType::Create,
            expected_modifier.object_type(),
            vec![expected_modifier.create_sql()],
        ));
    }

    statements
}

/// Split two modifier sets by key.
///
/// `missing` is present only in `a` (must be created), `additional` only in
/// `b` (must be dropped), `common` in both.
fn partition<'m, M: Modifier>(
    a: &'m [M],
    b: &'m [M],
) -> (Vec<&'m M>, Vec<&'m M>, Vec<(&'m M, &'m M)>) {
    let a_map: BTreeMap<String, &M> = a.iter().map(|m| (m.key(), m)).collect();
    let b_map: BTreeMap<String, &M> = b.iter().map(|m| (m.key(), m)).collect();

    let mut missing = Vec::new();
    let mut common = Vec::new();
    for (key, a_value) in &a_map {
        match b_map.get(key) {
            Some(b_value) => common.push((*a_value, *b_value)),
            None => missing.push(*a_value),
        }
    }

    let additional = b_map
        .iter()
        .filter(|(key, _)| !a_map.contains_key(*key))
        .map(|(_, value)| *value)
        .collect();

    (missing, additional, common)
}

enum SortKind {
    Key,
    CreateViews,
    DropViews,
}

/// Flush statement buckets in dependency order.
///
/// Dependency mapping:
///
/// - extensions, enums, functions, tables, sequences: no dependencies
/// - columns: depend on tables, enums, sequences
/// - constraints: depend on tables, columns; FKs depend on unique constraints
/// - indexes: depend on tables, columns
/// - views: depend on tables, columns, views
/// - triggers: depend on tables, columns, functions
fn flush_ordered(
    unique: BTreeMap<(StatementType, ObjectType, String), DdlStatement>,
    expected: &SchemaDescription,
    observed: &SchemaDescription,
) -> Vec<String> {
    use ObjectType::*;
    use StatementType::*;

    let (create_closure, drop_closure) = view_dependency_closures(expected, observed);

    let order: [(StatementType, ObjectType, SortKind); 24] = [
        (Drop, Trigger, SortKind::Key),
        (Drop, View, SortKind::DropViews),
        (Drop, Constraint, SortKind::Key),
        (Drop, Index, SortKind::Key),
        (Drop, Column, SortKind::Key),
        (Drop, Sequence, SortKind::Key),
        (Drop, Table, SortKind::Key),
        (Drop, Function, SortKind::Key),
        (Drop, Enum, SortKind::Key),
        (Drop, Extension, SortKind::Key),
        (Create, Extension, SortKind::Key),
        (Create, Enum, SortKind::Key),
        (Replace, Enum, SortKind::Key),
        (Create, Function, SortKind::Key),
        (Replace, Function, SortKind::Key),
        (Create, Table, SortKind::Key),
        (Create, Sequence, SortKind::Key),
        (Replace, Sequence, SortKind::Key),
        (Create, Column, SortKind::Key),
        (Replace, Column, SortKind::Key),
        (Create, Index, SortKind::Key),
        (Create, Constraint, SortKind::Key),
        (Create, View, SortKind::CreateViews),
        (Create, Trigger, SortKind::Key),
    ];

    let mut output = Vec::new();
    for (statement_type, object_type, sort) in order {
        // Values come out of the map sorted by key within the bucket.
        let bucket: Vec<&DdlStatement> = unique
            .values()
            .filter(|s| s.statement_type == statement_type && s.object_type == object_type)
            .collect();

        let bucket = match sort {
            SortKind::Key => bucket,
            SortKind::CreateViews => topological_order(bucket, &create_closure),
            SortKind::DropViews => topological_order(bucket, &drop_closure),
        };

        for statement in bucket {
            output.extend(statement.statements.iter().cloned());
        }
    }

    output
}

/// A reference relationship: key to the set of keys referencing it (or
/// referenced by it, depending on direction).
pub(crate) type Closure = BTreeMap<String, BTreeSet<String>>;

/// Dependency closures over view keys. The create closure maps each
/// referenced table/view to the views depending on it (from the expected
/// schema); the drop closure maps each view to what it references (from the
/// observed schema). Both are expanded transitively.
pub(crate) fn view_dependency_closures(
    expected: &SchemaDescription,
    observed: &SchemaDescription,
) -> (Closure, Closure) {
    let mut create_closure = Closure::new();
    for dependency in &expected.column_dependencies {
        let used = qualified(&dependency.used_namespace, &dependency.used_table_or_view);
        let dependent = qualified(&dependency.dependent_namespace, &dependency.dependent_view);
        create_closure.entry(used).or_default().insert(dependent);
    }

    let mut drop_closure = Closure::new();
    for dependency in &observed.column_dependencies {
        let used = qualified(&dependency.used_namespace, &dependency.used_table_or_view);
        let dependent = qualified(&dependency.dependent_namespace, &dependency.dependent_view);
        drop_closure.entry(dependent).or_default().insert(used);
    }

    transitive_closure(&mut create_closure);
    transitive_closure(&mut drop_closure);

    (create_closure, drop_closure)
}

/// Expand a closure in-place to directly encode all transitive references.
fn transitive_closure(closure: &mut Closure) {
    let mut changed = true;
    while changed {
        changed = false;

        let keys: Vec<String> = closure.keys().cloned().collect();
        for key in &keys {
            let references: Vec<String> = closure[key].iter().cloned().collect();

            let mut additions = Vec::new();
            for reference in &references {
                if let Some(next) = closure.get(reference) {
                    for transitive in next {
                        if !closure[key].contains(transitive) {
                            additions.push(transitive.clone());
                        }
                    }
                }
            }

            if !additions.is_empty() {
                let set = closure.get_mut(key).expect("key was enumerated above");
                for addition in additions {
                    if set.insert(addition) {
                        changed = true;
                    }
                }
            }
        }
    }
}

/// Topologically order a statement bucket by the given closure, breaking
/// ties lexicographically by key. The data here is tens of views at most, so
/// a repeated linear scan beats maintaining a priority structure.
///
/// # Panics
///
/// Panics on a dependency cycle; the catalog cannot produce one, so a cycle
/// is a programmer error in the caller-supplied expected schema.
fn topological_order<'s>(
    statements: Vec<&'s DdlStatement>,
    closure: &Closure,
) -> Vec<&'s DdlStatement> {
    let by_key: BTreeMap<&str, &DdlStatement> =
        statements.iter().map(|s| (s.key.as_str(), *s)).collect();

    // Edges point from a referenced key to each statement that must wait
    // for it.
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = statements
        .iter()
        .map(|s| (s.key.as_str(), BTreeSet::new()))
        .collect();
    for statement in &statements {
        if let Some(references) = closure.get(&statement.key) {
            for reference in references {
                if let Some(edges) = graph.get_mut(reference.as_str()) {
                    edges.insert(statement.key.as_str());
                }
            }
        }
    }

    let mut ordered = Vec::with_capacity(statements.len());
    while !graph.is_empty() {
        // BTreeMap iteration gives the lexicographically smallest
        // zero-edge candidate first.
        let top = match graph
            .iter()
            .find(|(_, edges)| edges.is_empty())
            .map(|(key, _)| *key)
        {
            Some(key) => key,
            None => panic!("cycle detected in view dependencies, cannot perform topological sort"),
        };

        ordered.push(by_key[top]);
        graph.remove(top);
        for edges in graph.values_mut() {
            edges.remove(top);
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{ColumnDependency, ViewDescription};

    fn dependency(used: &str, dependent: &str) -> ColumnDependency {
        ColumnDependency {
            used_namespace: "public".to_string(),
            used_table_or_view: used.to_string(),
            used_column_name: "x".to_string(),
            dependent_namespace: "public".to_string(),
            dependent_view: dependent.to_string(),
        }
    }

    fn view(name: &str, definition: &str) -> ViewDescription {
        ViewDescription {
            namespace: "public".to_string(),
            name: name.to_string(),
            definition: definition.to_string(),
        }
    }

    fn schema_with_views(
        views: Vec<ViewDescription>,
        column_dependencies: Vec<ColumnDependency>,
    ) -> SchemaDescription {
        SchemaDescription {
            views,
            column_dependencies,
            ..SchemaDescription::default()
        }
    }

    // Tables t, v_foo reading t, v_bar reading v_foo, v_baz reading both
    // v_foo and t.
    fn diamond_dependencies() -> Vec<ColumnDependency> {
        vec![
            dependency("t", "v_foo"),
            dependency("v_foo", "v_bar"),
            dependency("v_foo", "v_baz"),
            dependency("t", "v_baz"),
        ]
    }

    #[test]
    fn test_create_order_follows_dependencies() {
        let expected = schema_with_views(
            vec![
                view("v_baz", "SELECT * FROM v_foo UNION SELECT * FROM t"),
                view("v_bar", "SELECT * FROM v_foo"),
                view("v_foo", "SELECT * FROM t"),
            ],
            diamond_dependencies(),
        );
        let observed = SchemaDescription::default();

        let statements = compare(&expected, &observed);
        let positions: Vec<usize> = ["v_foo", "v_bar", "v_baz"]
            .iter()
            .map(|name| {
                statements
                    .iter()
                    .position(|s| s.contains(&format!("\"{name}\"")))
                    .unwrap_or_else(|| panic!("no statement for {name}"))
            })
            .collect();

        assert!(positions[0] < positions[1], "v_foo before v_bar");
        assert!(positions[1] < positions[2], "v_bar before v_baz");
    }

    #[test]
    fn test_drop_order_reverses_dependencies() {
        let expected = SchemaDescription::default();
        let observed = schema_with_views(
            vec![
                view("v_bar", "SELECT * FROM v_foo"),
                view("v_baz", "SELECT * FROM v_foo UNION SELECT * FROM t"),
                view("v_foo", "SELECT * FROM t"),
            ],
            diamond_dependencies(),
        );

        let statements = compare(&expected, &observed);
        let foo = statements
            .iter()
            .position(|s| s.contains("\"v_foo\""))
            .expect("v_foo dropped");
        let bar = statements
            .iter()
            .position(|s| s.contains("\"v_bar\""))
            .expect("v_bar dropped");
        let baz = statements
            .iter()
            .position(|s| s.contains("\"v_baz\""))
            .expect("v_baz dropped");

        assert!(bar < foo, "v_bar drops before v_foo");
        assert!(baz < foo, "v_baz drops before v_foo");
    }

    #[test]
    #[should_panic(expected = "cycle detected")]
    fn test_cycle_is_fatal() {
        let expected = schema_with_views(
            vec![view("v_a", "SELECT * FROM v_b"), view("v_b", "SELECT * FROM v_a")],
            vec![dependency("v_a", "v_b"), dependency("v_b", "v_a")],
        );

        let _ = compare(&expected, &SchemaDescription::default());
    }

    #[test]
    fn test_transitive_closure() {
        let mut closure = Closure::new();
        closure
            .entry("a".to_string())
            .or_default()
            .insert("b".to_string());
        closure
            .entry("b".to_string())
            .or_default()
            .insert("c".to_string());

        transitive_closure(&mut closure);

        assert!(closure["a"].contains("c"));
        assert!(!closure["b"].contains("b"));
    }

    #[test]
    fn test_table_shell_precedes_column_creates() {
        use crate::describe::{ColumnDescription, TableDescription};

        let expected = SchemaDescription {
            tables: vec![TableDescription {
                namespace: "public".to_string(),
                name: "users".to_string(),
                columns: vec![ColumnDescription {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    is_nullable: false,
                    default_value: None,
                    character_maximum_length: None,
                    is_identity: false,
                    identity_generation: None,
                    is_generated: false,
                    generation_expression: None,
                }],
                constraints: vec![],
                indexes: vec![],
            }],
            ..SchemaDescription::default()
        };

        let statements = compare(&expected, &SchemaDescription::default());
        assert_eq!(
            statements,
            vec![
                r#"CREATE TABLE IF NOT EXISTS "public"."users"();"#.to_string(),
                r#"ALTER TABLE "public"."users" ADD COLUMN IF NOT EXISTS "id" integer NOT NULL;"#
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_enum_label_addition_stays_in_replace_bucket() {
        use crate::describe::EnumDescription;

        let enum_with = |labels: &[&str]| EnumDescription {
            namespace: "public".to_string(),
            name: "mood".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        };

        let expected = SchemaDescription {
            enums: vec![enum_with(&["foo", "bar", "baz", "bonk"])],
            ..SchemaDescription::default()
        };
        let observed = SchemaDescription {
            enums: vec![enum_with(&["foo", "bar"])],
            ..SchemaDescription::default()
        };

        let statements = compare(&expected, &observed);
        assert_eq!(
            statements,
            vec![
                r#"ALTER TYPE "public"."mood" ADD VALUE 'baz' AFTER 'bar';"#.to_string(),
                r#"ALTER TYPE "public"."mood" ADD VALUE 'bonk' AFTER 'baz';"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_identical_schemas_are_quiet() {
        let schema = schema_with_views(
            vec![view("v_foo", "SELECT * FROM t")],
            vec![dependency("t", "v_foo")],
        );

        assert!(compare(&schema, &schema.clone()).is_empty());
    }
}
