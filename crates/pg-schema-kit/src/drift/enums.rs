use super::views::create_view_sql;
use super::{
    view_dependency_closures, DdlStatement, Modifier, ObjectType, StatementType,
};
use crate::describe::{
    qualified, quote_ident, EnumDependency, EnumDescription, SchemaDescription,
};

pub(super) struct EnumModifier<'s> {
    schema: &'s SchemaDescription,
    d: &'s EnumDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<EnumModifier<'_>> {
    schema
        .enums
        .iter()
        .map(|d| EnumModifier { schema, d })
        .collect()
}

impl Modifier for EnumModifier<'_> {
    type Desc = EnumDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Enum
    }

    fn description(&self) -> &EnumDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        let quoted_labels: Vec<String> = self.d.labels.iter().map(|l| enum_quote(l)).collect();

        format!(
            "CREATE TYPE {} AS ENUM ({});",
            self.key(),
            quoted_labels.join(", ")
        )
    }

    fn drop_sql(&self) -> String {
        format!("DROP TYPE IF EXISTS {};", self.key())
    }

    // The cheap path adds labels in place, which is only legal when the
    // expected label list is the existing one plus insertions. Anything else
    // (removals, reorderings) rebuilds the type and rewrites every column
    // using it.
    fn alter_existing(
        &self,
        observed_schema: &SchemaDescription,
        existing: &EnumDescription,
    ) -> Option<Vec<DdlStatement>> {
        match unify_labels(&self.d.labels, &existing.labels) {
            Some(reconstruction) => Some(self.alter_via_reconstruction(&reconstruction)),
            None => Some(self.alter_via_rebuild(observed_schema)),
        }
    }
}

impl EnumModifier<'_> {
    fn alter_via_reconstruction(&self, reconstruction: &[MissingLabel]) -> Vec<DdlStatement> {
        let statements = reconstruction
            .iter()
            .map(|missing| {
                let relative_to = match (&missing.prev, &missing.next) {
                    (_, Some(next)) => format!("BEFORE {}", enum_quote(next)),
                    (Some(prev), None) => format!("AFTER {}", enum_quote(prev)),
                    (None, None) => unreachable!("missing label has a neighbor by construction"),
                };

                format!(
                    "ALTER TYPE {} ADD VALUE {} {};",
                    self.key(),
                    enum_quote(&missing.label),
                    relative_to
                )
            })
            .collect();

        vec![DdlStatement::new(
            self.key(),
            StatementType::Replace,
            self.object_type(),
            statements,
        )]
    }

    // Rebuild plan:
    //   1. Rename the existing enum type aside.
    //   2. Create the new enum type under the old name.
    //   3. Drop all views that depend (transitively) on a table with a
    //      column of the enum type.
    //   4. Per dependent table: drop column defaults, retype the columns
    //      through text, re-add the defaults.
    //   5. Recreate the dropped views.
    //   6. Drop the renamed type.
    //
    // The view statements are tagged as view drops/creates so the global
    // ordering places them in the view buckets.
    fn alter_via_rebuild(&self, observed_schema: &SchemaDescription) -> Vec<DdlStatement> {
        let key = self.key();

        let dependencies: Vec<&EnumDependency> = observed_schema
            .enum_dependencies
            .iter()
            .filter(|dep| {
                dep.enum_namespace == self.d.namespace && dep.enum_name == self.d.name
            })
            .collect();

        // Transitive view dependencies within the observed schema only.
        let (dependency_closure, _) =
            view_dependency_closures(observed_schema, &SchemaDescription::default());

        let mut views: Vec<String> = Vec::new();
        for dependency in &dependencies {
            let table_key = qualified(&dependency.table_namespace, &dependency.table_name);
            if let Some(dependents) = dependency_closure.get(&table_key) {
                for view_key in dependents {
                    if !views.contains(view_key) {
                        views.push(view_key.clone());
                    }
                }
            }
        }

        let mut alter_table_statements = Vec::new();
        for dependency in &dependencies {
            let default_value = column_default(
                observed_schema,
                &dependency.table_namespace,
                &dependency.table_name,
                &dependency.column_name,
            );

            let mut actions = Vec::new();
            if default_value.is_some() {
                actions.push(format!(
                    "ALTER COLUMN {} DROP DEFAULT",
                    quote_ident(&dependency.column_name)
                ));
            }

            actions.push(format!(
                "ALTER COLUMN {} TYPE {} USING ({}::text::{})",
                quote_ident(&dependency.column_name),
                key,
                quote_ident(&dependency.column_name),
                key
            ));

            if let Some(default_value) = &default_value {
                actions.push(format!(
                    "ALTER COLUMN {} SET DEFAULT {}",
                    quote_ident(&dependency.column_name),
                    default_value
                ));
            }

            alter_table_statements.push(format!(
                "ALTER TABLE {} {};",
                qualified(&dependency.table_namespace, &dependency.table_name),
                actions.join(", ")
            ));
        }

        let mut statements = Vec::new();
        for view_key in &views {
            statements.push(DdlStatement::new(
                view_key.clone(),
                StatementType::Drop,
                ObjectType::View,
                vec![format!("DROP VIEW IF EXISTS {view_key};")],
            ));

            // If the expected schema holds this view with the SAME
            // definition, the normal view diff sees no drift and will not
            // recreate it; issue the recreation here so the drop is not an
            // unintended side effect. A changed definition is already
            // covered by the view diff.
            let existing_definition = observed_schema
                .views
                .iter()
                .find(|view| qualified(&view.namespace, &view.name) == *view_key)
                .map(|view| view.definition.as_str());

            let unchanged = self.schema.views.iter().find(|view| {
                qualified(&view.namespace, &view.name) == *view_key
                    && Some(view.definition.as_str()) == existing_definition
            });

            if let Some(view) = unchanged {
                statements.push(DdlStatement::new(
                    view_key.clone(),
                    StatementType::Create,
                    ObjectType::View,
                    vec![create_view_sql(view_key, &view.definition)],
                ));
            }
        }

        let backup_name = format!("{}_bak", self.d.name);
        let mut enum_statements = vec![format!(
            "ALTER TYPE {} RENAME TO {};",
            key,
            quote_ident(&backup_name)
        )];
        enum_statements.push(self.create_sql());
        enum_statements.extend(alter_table_statements);
        enum_statements.push(format!(
            "DROP TYPE {};",
            qualified(&self.d.namespace, &backup_name)
        ));

        statements.push(DdlStatement::new(
            key,
            StatementType::Replace,
            self.object_type(),
            enum_statements,
        ));

        statements
    }
}

fn enum_quote(label: &str) -> String {
    format!("'{}'", label.replace('\'', "''"))
}

fn column_default(
    schema: &SchemaDescription,
    namespace: &str,
    table_name: &str,
    column_name: &str,
) -> Option<String> {
    schema
        .tables
        .iter()
        .find(|table| table.namespace == namespace && table.name == table_name)
        .and_then(|table| table.columns.iter().find(|c| c.name == column_name))
        .and_then(|column| column.default_value.clone())
}

#[derive(Debug, PartialEq)]
struct MissingLabel {
    label: String,
    prev: Option<String>,
    next: Option<String>,
}

/// Decide whether `expected` can be produced from `existing` by insertion
/// alone. On success, returns the labels to insert with their anchors, in
/// insertion order; `None` means the existing list contains labels that are
/// removed or reordered and the type must be rebuilt.
fn unify_labels(expected: &[String], existing: &[String]) -> Option<Vec<MissingLabel>> {
    if expected.is_empty() || existing.is_empty() {
        return None;
    }

    let mut j = 0;
    let mut missing_indexes = Vec::new();

    for (i, label) in expected.iter().enumerate() {
        if j < existing.len() && existing[j] == *label {
            j += 1;
        } else if i > 0 {
            missing_indexes.push(i);
        }
    }

    if j < existing.len() {
        return None;
    }

    let mut reconstruction = Vec::new();

    // A new head label anchors before the existing head; labels inserted
    // behind it then chain after one another.
    if expected[0] != existing[0] {
        reconstruction.push(MissingLabel {
            label: expected[0].clone(),
            prev: None,
            next: Some(existing[0].clone()),
        });
    }

    for i in missing_indexes {
        reconstruction.push(MissingLabel {
            label: expected[i].clone(),
            prev: Some(expected[i - 1].clone()),
            next: None,
        });
    }

    Some(reconstruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{ColumnDescription, TableDescription};

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mood(label_values: &[&str]) -> EnumDescription {
        EnumDescription {
            namespace: "public".to_string(),
            name: "mood".to_string(),
            labels: labels(label_values),
        }
    }

    #[test]
    fn test_unify_labels_missing_at_end() {
        let reconstruction = unify_labels(
            &labels(&["foo", "bar", "baz", "bonk"]),
            &labels(&["foo", "bar"]),
        )
        .expect("insertion-only transformation");

        assert_eq!(
            reconstruction,
            vec![
                MissingLabel {
                    label: "baz".to_string(),
                    prev: Some("bar".to_string()),
                    next: None,
                },
                MissingLabel {
                    label: "bonk".to_string(),
                    prev: Some("baz".to_string()),
                    next: None,
                },
            ]
        );
    }

    #[test]
    fn test_unify_labels_missing_at_beginning() {
        let reconstruction = unify_labels(
            &labels(&["foo", "bar", "baz", "bonk"]),
            &labels(&["baz", "bonk"]),
        )
        .expect("insertion-only transformation");

        assert_eq!(
            reconstruction,
            vec![
                MissingLabel {
                    label: "foo".to_string(),
                    prev: None,
                    next: Some("baz".to_string()),
                },
                MissingLabel {
                    label: "bar".to_string(),
                    prev: Some("foo".to_string()),
                    next: None,
                },
            ]
        );
    }

    #[test]
    fn test_unify_labels_rejects_removal() {
        assert!(unify_labels(&labels(&["foo", "baz"]), &labels(&["foo", "bar", "baz"])).is_none());
    }

    #[test]
    fn test_unify_labels_rejects_reorder() {
        assert!(unify_labels(
            &labels(&["happy", "sad", "ok", "gleeful"]),
            &labels(&["sad", "ok", "happy"]),
        )
        .is_none());
    }

    #[test]
    fn test_alter_via_reconstruction() {
        let schema = SchemaDescription::default();
        let expected = mood(&["foo", "bar", "baz", "bonk"]);
        let existing = mood(&["foo", "bar"]);
        let modifier = EnumModifier {
            schema: &schema,
            d: &expected,
        };

        let statements = modifier
            .alter_existing(&SchemaDescription::default(), &existing)
            .expect("enums always alter");
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].statement_type, StatementType::Replace);
        assert_eq!(
            statements[0].statements,
            vec![
                r#"ALTER TYPE "public"."mood" ADD VALUE 'baz' AFTER 'bar';"#,
                r#"ALTER TYPE "public"."mood" ADD VALUE 'bonk' AFTER 'baz';"#,
            ]
        );
    }

    #[test]
    fn test_alter_via_reconstruction_escapes_labels() {
        let schema = SchemaDescription::default();
        let expected = mood(&["there", "their", "they're"]);
        let existing = mood(&["there", "their"]);
        let modifier = EnumModifier {
            schema: &schema,
            d: &expected,
        };

        let statements = modifier
            .alter_existing(&SchemaDescription::default(), &existing)
            .expect("enums always alter");
        assert_eq!(
            statements[0].statements,
            vec![r#"ALTER TYPE "public"."mood" ADD VALUE 'they''re' AFTER 'their';"#]
        );
    }

    #[test]
    fn test_alter_via_rebuild() {
        let expected_schema = SchemaDescription::default();
        let expected = mood(&["happy", "sad", "ok", "gleeful"]);
        let existing = mood(&["sad", "ok", "happy"]);

        let observed_schema = SchemaDescription {
            enums: vec![existing.clone()],
            tables: vec![TableDescription {
                namespace: "public".to_string(),
                name: "people".to_string(),
                columns: vec![ColumnDescription {
                    name: "current_mood".to_string(),
                    data_type: "mood".to_string(),
                    is_nullable: true,
                    default_value: Some("'sad'::mood".to_string()),
                    character_maximum_length: None,
                    is_identity: false,
                    identity_generation: None,
                    is_generated: false,
                    generation_expression: None,
                }],
                constraints: vec![],
                indexes: vec![],
            }],
            enum_dependencies: vec![EnumDependency {
                enum_namespace: "public".to_string(),
                enum_name: "mood".to_string(),
                table_namespace: "public".to_string(),
                table_name: "people".to_string(),
                column_name: "current_mood".to_string(),
            }],
            ..SchemaDescription::default()
        };

        let modifier = EnumModifier {
            schema: &expected_schema,
            d: &expected,
        };

        let statements = modifier
            .alter_existing(&observed_schema, &existing)
            .expect("enums always alter");
        let replace = statements
            .iter()
            .find(|s| s.statement_type == StatementType::Replace)
            .expect("rebuild emits a replace");

        assert_eq!(
            replace.statements,
            vec![
                r#"ALTER TYPE "public"."mood" RENAME TO "mood_bak";"#,
                r#"CREATE TYPE "public"."mood" AS ENUM ('happy', 'sad', 'ok', 'gleeful');"#,
                r#"ALTER TABLE "public"."people" ALTER COLUMN "current_mood" DROP DEFAULT, ALTER COLUMN "current_mood" TYPE "public"."mood" USING ("current_mood"::text::"public"."mood"), ALTER COLUMN "current_mood" SET DEFAULT 'sad'::mood;"#,
                r#"DROP TYPE "public"."mood_bak";"#,
            ]
        );
    }
}
