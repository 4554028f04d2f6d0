use super::{Modifier, ObjectType};
use crate::describe::{qualified, quote_ident, SchemaDescription, TriggerDescription};

pub(super) struct TriggerModifier<'s> {
    d: &'s TriggerDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<TriggerModifier<'_>> {
    schema.triggers.iter().map(|d| TriggerModifier { d }).collect()
}

impl Modifier for TriggerModifier<'_> {
    type Desc = TriggerDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Trigger
    }

    fn description(&self) -> &TriggerDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        format!("{};", self.d.definition)
    }

    fn drop_sql(&self) -> String {
        format!(
            "DROP TRIGGER IF EXISTS {} ON {};",
            quote_ident(&self.d.name),
            qualified(&self.d.namespace, &self.d.table_name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements() {
        let description = TriggerDescription {
            namespace: "public".to_string(),
            name: "users_audit".to_string(),
            table_name: "users".to_string(),
            function_namespace: "public".to_string(),
            definition:
                "CREATE TRIGGER users_audit AFTER UPDATE ON public.users FOR EACH ROW EXECUTE FUNCTION audit()"
                    .to_string(),
        };
        let modifier = TriggerModifier { d: &description };

        assert_eq!(
            modifier.create_sql(),
            "CREATE TRIGGER users_audit AFTER UPDATE ON public.users FOR EACH ROW EXECUTE FUNCTION audit();"
        );
        assert_eq!(
            modifier.drop_sql(),
            r#"DROP TRIGGER IF EXISTS "users_audit" ON "public"."users";"#
        );
    }
}
