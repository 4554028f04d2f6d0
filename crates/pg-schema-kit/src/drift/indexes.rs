use super::{Modifier, ObjectType};
use crate::describe::{quote_ident, IndexDescription, SchemaDescription, TableDescription};

pub(super) struct IndexModifier<'s> {
    t: &'s TableDescription,
    d: &'s IndexDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<IndexModifier<'_>> {
    schema
        .tables
        .iter()
        .flat_map(|t| t.indexes.iter().map(move |d| IndexModifier { t, d }))
        .collect()
}

impl IndexModifier<'_> {
    fn table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.t.namespace),
            quote_ident(&self.t.name)
        )
    }

    // Indexes backing primary-key and unique constraints are managed
    // through the constraint, not the index itself.
    fn is_constraint(&self) -> bool {
        matches!(self.d.constraint_type.as_deref(), Some("u") | Some("p"))
    }
}

impl Modifier for IndexModifier<'_> {
    type Desc = IndexDescription;

    fn key(&self) -> String {
        format!("{}.{}", self.table(), quote_ident(&self.d.name))
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Index
    }

    fn description(&self) -> &IndexDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        if self.is_constraint() {
            return format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {};",
                self.table(),
                quote_ident(&self.d.name),
                self.d.constraint_definition.as_deref().unwrap_or_default()
            );
        }

        format!("{};", self.d.index_definition)
    }

    fn drop_sql(&self) -> String {
        if self.is_constraint() {
            return format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                self.table(),
                quote_ident(&self.d.name)
            );
        }

        format!(
            "DROP INDEX IF EXISTS {}.{};",
            quote_ident(&self.t.namespace),
            quote_ident(&self.d.name)
        )
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

    fn index(constraint_type: Option<&str>) -> IndexDescription {
        IndexDescription {
            name: "users_email_idx".to_string(),
            is_primary_key: false,
            is_unique: true,
            is_exclusion: false,
            is_deferrable: false,
            index_definition: "CREATE UNIQUE INDEX users_email_idx ON public.users USING btree (email)"
                .to_string(),
            constraint_type: constraint_type.map(str::to_string),
            constraint_definition: constraint_type.map(|_| "UNIQUE (email)".to_string()),
        }
    }

    #[test]
    fn test_plain_index_uses_definition() {
        let t = table();
        let d = index(None);
        let modifier = IndexModifier { t: &t, d: &d };

        assert_eq!(
            modifier.create_sql(),
            "CREATE UNIQUE INDEX users_email_idx ON public.users USING btree (email);"
        );
        assert_eq!(
            modifier.drop_sql(),
            r#"DROP INDEX IF EXISTS "public"."users_email_idx";"#
        );
    }

    #[test]
    fn test_constraint_backed_index_manages_constraint() {
        let t = table();
        let d = index(Some("u"));
        let modifier = IndexModifier { t: &t, d: &d };

        assert_eq!(
            modifier.create_sql(),
            r#"ALTER TABLE "public"."users" ADD CONSTRAINT "users_email_idx" UNIQUE (email);"#
        );
        assert_eq!(
            modifier.drop_sql(),
            r#"ALTER TABLE "public"."users" DROP CONSTRAINT IF EXISTS "users_email_idx";"#
        );
    }
}
