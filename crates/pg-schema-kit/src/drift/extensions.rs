use super::{Modifier, ObjectType};
use crate::describe::{qualified, quote_ident, ExtensionDescription, SchemaDescription};

pub(super) struct ExtensionModifier<'s> {
    d: &'s ExtensionDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<ExtensionModifier<'_>> {
    schema
        .extensions
        .iter()
        .map(|d| ExtensionModifier { d })
        .collect()
}

impl Modifier for ExtensionModifier<'_> {
    type Desc = ExtensionDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Extension
    }

    fn description(&self) -> &ExtensionDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        format!(
            "CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {};",
            quote_ident(&self.d.name),
            quote_ident(&self.d.namespace)
        )
    }

    fn drop_sql(&self) -> String {
        format!("DROP EXTENSION IF EXISTS {};", quote_ident(&self.d.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements() {
        let description = ExtensionDescription {
            namespace: "public".to_string(),
            name: "hstore".to_string(),
        };
        let modifier = ExtensionModifier { d: &description };

        assert_eq!(
            modifier.create_sql(),
            r#"CREATE EXTENSION IF NOT EXISTS "hstore" WITH SCHEMA "public";"#
        );
        assert_eq!(modifier.drop_sql(), r#"DROP EXTENSION IF EXISTS "hstore";"#);
    }
}
