use super::{Modifier, ObjectType};
use crate::describe::{qualified, SchemaDescription, TableDescription};

pub(super) struct TableModifier<'s> {
    d: &'s TableDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<TableModifier<'_>> {
    schema.tables.iter().map(|d| TableModifier { d }).collect()
}

impl Modifier for TableModifier<'_> {
    type Desc = TableDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Table
    }

    fn description(&self) -> &TableDescription {
        self.d
    }

    // Columns, constraints, and indexes are diffed as separate kinds, so a
    // created table starts as an empty shell and its column creates follow
    // in a later bucket.
    fn create_sql(&self) -> String {
        format!("CREATE TABLE IF NOT EXISTS {}();", self.key())
    }

    fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.key())
    }

    // Identity only; the children have their own modifiers.
    fn unchanged(&self, existing: &TableDescription) -> bool {
        self.d.same_identity(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_empty_shell() {
        let description = TableDescription {
            namespace: "public".to_string(),
            name: "users".to_string(),
            columns: vec![],
            constraints: vec![],
            indexes: vec![],
        };
        let modifier = TableModifier { d: &description };

        assert_eq!(
            modifier.create_sql(),
            r#"CREATE TABLE IF NOT EXISTS "public"."users"();"#
        );
        assert_eq!(modifier.drop_sql(), r#"DROP TABLE IF EXISTS "public"."users";"#);
    }
}
