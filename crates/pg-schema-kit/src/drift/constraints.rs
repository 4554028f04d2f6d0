use super::{Modifier, ObjectType};
use crate::describe::{quote_ident, ConstraintDescription, SchemaDescription, TableDescription};

pub(super) struct ConstraintModifier<'s> {
    t: &'s TableDescription,
    d: &'s ConstraintDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<ConstraintModifier<'_>> {
    schema
        .tables
        .iter()
        .flat_map(|t| t.constraints.iter().map(move |d| ConstraintModifier { t, d }))
        .collect()
}

impl ConstraintModifier<'_> {
    fn table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.t.namespace),
            quote_ident(&self.t.name)
        )
    }
}

impl Modifier for ConstraintModifier<'_> {
    type Desc = ConstraintDescription;

    fn key(&self) -> String {
        format!("{}.{}", self.table(), quote_ident(&self.d.name))
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Constraint
    }

    fn description(&self) -> &ConstraintDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            self.table(),
            quote_ident(&self.d.name),
            self.d.definition
        )
    }

    fn drop_sql(&self) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            self.table(),
            quote_ident(&self.d.name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements() {
        let t = TableDescription {
            namespace: "public".to_string(),
            name: "orders".to_string(),
            columns: vec![],
            constraints: vec![],
            indexes: vec![],
        };
        let d = ConstraintDescription {
            name: "orders_total_check".to_string(),
            constraint_type: "c".to_string(),
            is_deferrable: false,
            referenced_table_name: None,
            definition: "CHECK ((total >= 0))".to_string(),
        };
        let modifier = ConstraintModifier { t: &t, d: &d };

        assert_eq!(
            modifier.create_sql(),
            r#"ALTER TABLE "public"."orders" ADD CONSTRAINT "orders_total_check" CHECK ((total >= 0));"#
        );
        assert_eq!(
            modifier.drop_sql(),
            r#"ALTER TABLE "public"."orders" DROP CONSTRAINT IF EXISTS "orders_total_check";"#
        );
    }
}
