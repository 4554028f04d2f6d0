use super::{DdlStatement, Modifier, ObjectType, StatementType};
use crate::describe::{quote_ident, FunctionDescription, SchemaDescription};

pub(super) struct FunctionModifier<'s> {
    d: &'s FunctionDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<FunctionModifier<'_>> {
    schema
        .functions
        .iter()
        .map(|d| FunctionModifier { d })
        .collect()
}

impl Modifier for FunctionModifier<'_> {
    type Desc = FunctionDescription;

    // Functions are keyed by signature, not just name, so overloads diff
    // independently.
    fn key(&self) -> String {
        format!(
            "{}.{}({})",
            quote_ident(&self.d.namespace),
            quote_ident(&self.d.name),
            self.d.arg_types.join(", ")
        )
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Function
    }

    fn description(&self) -> &FunctionDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        format!("{};", self.d.definition)
    }

    fn drop_sql(&self) -> String {
        format!("DROP FUNCTION IF EXISTS {};", self.key())
    }

    // The stored definition is already a CREATE OR REPLACE, so an altered
    // function re-issues it without an explicit drop.
    fn alter_existing(
        &self,
        _observed_schema: &SchemaDescription,
        _existing: &FunctionDescription,
    ) -> Option<Vec<DdlStatement>> {
        Some(vec![DdlStatement::new(
            self.key(),
            StatementType::Create,
            self.object_type(),
            vec![self.create_sql()],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_signature() {
        let description = FunctionDescription {
            namespace: "public".to_string(),
            name: "add".to_string(),
            definition: "CREATE OR REPLACE FUNCTION public.add(a int4, b int4) ...".to_string(),
            arg_types: vec!["int4".to_string(), "int4".to_string()],
        };
        let modifier = FunctionModifier { d: &description };

        assert_eq!(modifier.key(), r#""public"."add"(int4, int4)"#);
        assert_eq!(
            modifier.drop_sql(),
            r#"DROP FUNCTION IF EXISTS "public"."add"(int4, int4);"#
        );
    }
}
