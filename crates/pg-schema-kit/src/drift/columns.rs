use super::{DdlStatement, Modifier, ObjectType, StatementType};
use crate::describe::{quote_ident, ColumnDescription, SchemaDescription, TableDescription};

pub(super) struct ColumnModifier<'s> {
    t: &'s TableDescription,
    d: &'s ColumnDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<ColumnModifier<'_>> {
    schema
        .tables
        .iter()
        .flat_map(|t| t.columns.iter().map(move |d| ColumnModifier { t, d }))
        .collect()
}

impl ColumnModifier<'_> {
    fn table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.t.namespace),
            quote_ident(&self.t.name)
        )
    }
}

impl Modifier for ColumnModifier<'_> {
    type Desc = ColumnDescription;

    fn key(&self) -> String {
        format!("{}.{}", self.table(), quote_ident(&self.d.name))
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Column
    }

    fn description(&self) -> &ColumnDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        let nullable_expr = if self.d.is_nullable { "" } else { " NOT NULL" };
        let default_expr = match &self.d.default_value {
            Some(default_value) => format!(" DEFAULT {default_value}"),
            None => String::new(),
        };

        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}{}{};",
            self.table(),
            quote_ident(&self.d.name),
            self.d.data_type,
            nullable_expr,
            default_expr
        )
    }

    fn drop_sql(&self) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
            self.table(),
            quote_ident(&self.d.name)
        )
    }

    /// One `ALTER COLUMN` per changed attribute, in the order data type,
    /// default, nullability. Identity and generated-expression drift is left
    /// unmodified.
    fn alter_existing(
        &self,
        _observed_schema: &SchemaDescription,
        existing: &ColumnDescription,
    ) -> Option<Vec<DdlStatement>> {
        let mut statements = Vec::new();
        let mut alter_column = |action: String| {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {};",
                self.table(),
                quote_ident(&self.d.name),
                action
            ));
        };

        if self.d.data_type != existing.data_type {
            alter_column(format!("SET DATA TYPE {}", self.d.data_type));
        }
        if self.d.default_value != existing.default_value {
            match &self.d.default_value {
                Some(default_value) => alter_column(format!("SET DEFAULT {default_value}")),
                None => alter_column("DROP DEFAULT".to_string()),
            }
        }
        if self.d.is_nullable != existing.is_nullable {
            if self.d.is_nullable {
                alter_column("DROP NOT NULL".to_string());
            } else {
                alter_column("SET NOT NULL".to_string());
            }
        }

        Some(vec![DdlStatement::new(
            self.key(),
            StatementType::Replace,
            self.object_type(),
            statements,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableDescription {
        TableDescription {
            namespace: "public".to_string(),
            name: "users".to_string(),
            columns: vec![],
            constraints: vec![],
            indexes: vec![],
        }
    }

    fn column(data_type: &str, nullable: bool, default_value: Option<&str>) -> ColumnDescription {
        ColumnDescription {
            name: "age".to_string(),
            data_type: data_type.to_string(),
            is_nullable: nullable,
            default_value: default_value.map(str::to_string),
            character_maximum_length: None,
            is_identity: false,
            identity_generation: None,
            is_generated: false,
            generation_expression: None,
        }
    }

    #[test]
    fn test_create_with_default_and_not_null() {
        let t = table();
        let d = column("integer", false, Some("0"));
        let modifier = ColumnModifier { t: &t, d: &d };

        assert_eq!(
            modifier.create_sql(),
            r#"ALTER TABLE "public"."users" ADD COLUMN IF NOT EXISTS "age" integer NOT NULL DEFAULT 0;"#
        );
    }

    #[test]
    fn test_alter_emits_changed_attributes_in_order() {
        let t = table();
        let expected = column("bigint", true, None);
        let existing = column("integer", false, Some("0"));
        let modifier = ColumnModifier { t: &t, d: &expected };

        let statements = modifier
            .alter_existing(&SchemaDescription::default(), &existing)
            .expect("columns always alter in place");
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].statements,
            vec![
                r#"ALTER TABLE "public"."users" ALTER COLUMN "age" SET DATA TYPE bigint;"#,
                r#"ALTER TABLE "public"."users" ALTER COLUMN "age" DROP DEFAULT;"#,
                r#"ALTER TABLE "public"."users" ALTER COLUMN "age" DROP NOT NULL;"#,
            ]
        );
    }

    #[test]
    fn test_alter_ignores_identity_drift() {
        let t = table();
        let expected = column("integer", true, None);
        let mut existing = column("integer", true, None);
        existing.is_identity = true;
        existing.identity_generation = Some("ALWAYS".to_string());
        let modifier = ColumnModifier { t: &t, d: &expected };

        let statements = modifier
            .alter_existing(&SchemaDescription::default(), &existing)
            .expect("columns always alter in place");
        assert!(statements[0].statements.is_empty());
    }
}
