use super::{DdlStatement, Modifier, ObjectType, StatementType};
use crate::describe::{qualified, SchemaDescription, SequenceDescription};

pub(super) struct SequenceModifier<'s> {
    d: &'s SequenceDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<SequenceModifier<'_>> {
    schema
        .sequences
        .iter()
        .map(|d| SequenceModifier { d })
        .collect()
}

impl Modifier for SequenceModifier<'_> {
    type Desc = SequenceDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Sequence
    }

    fn description(&self) -> &SequenceDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        let min_value = if self.d.minimum_value != 0 {
            format!("MINVALUE {}", self.d.minimum_value)
        } else {
            "NO MINVALUE".to_string()
        };

        let max_value = if self.d.maximum_value != 0 {
            format!("MAXVALUE {}", self.d.maximum_value)
        } else {
            "NO MAXVALUE".to_string()
        };

        format!(
            "CREATE SEQUENCE IF NOT EXISTS {} AS {} INCREMENT BY {} {} {} START WITH {} {} CYCLE;",
            self.key(),
            self.d.data_type,
            self.d.increment,
            min_value,
            max_value,
            self.d.start_value,
            self.d.cycle_option,
        )
    }

    fn drop_sql(&self) -> String {
        format!("DROP SEQUENCE IF EXISTS {};", self.key())
    }

    /// One `ALTER SEQUENCE` carrying only the clauses whose attributes
    /// changed.
    fn alter_existing(
        &self,
        _observed_schema: &SchemaDescription,
        existing: &SequenceDescription,
    ) -> Option<Vec<DdlStatement>> {
        let mut parts = vec![format!("ALTER SEQUENCE IF EXISTS {}", self.key())];

        if self.d.data_type != existing.data_type {
            parts.push(format!("AS {}", self.d.data_type));
        }
        if self.d.increment != existing.increment {
            parts.push(format!("INCREMENT BY {}", self.d.increment));
        }
        if self.d.minimum_value != existing.minimum_value {
            parts.push(format!("MINVALUE {}", self.d.minimum_value));
        }
        if self.d.maximum_value != existing.maximum_value {
            parts.push(format!("MAXVALUE {}", self.d.maximum_value));
        }
        if self.d.start_value != existing.start_value {
            parts.push(format!("START WITH {}", self.d.start_value));
        }
        if self.d.cycle_option != existing.cycle_option {
            if self.d.cycle_option == "YES" {
                parts.push("CYCLE".to_string());
            } else {
                parts.push("NO CYCLE".to_string());
            }
        }

        Some(vec![DdlStatement::new(
            self.key(),
            StatementType::Replace,
            self.object_type(),
            vec![format!("{};", parts.join(" "))],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(increment: i64, cycle_option: &str) -> SequenceDescription {
        SequenceDescription {
            namespace: "public".to_string(),
            name: "users_id_seq".to_string(),
            data_type: "bigint".to_string(),
            start_value: 1,
            minimum_value: 1,
            maximum_value: 9223372036854775807,
            increment,
            cycle_option: cycle_option.to_string(),
        }
    }

    #[test]
    fn test_alter_emits_only_changed_clauses() {
        let expected = sequence(2, "YES");
        let existing = sequence(1, "NO");
        let modifier = SequenceModifier { d: &expected };

        let statements = modifier
            .alter_existing(&SchemaDescription::default(), &existing)
            .expect("sequences always alter in place");
        assert_eq!(
            statements[0].statements,
            vec![r#"ALTER SEQUENCE IF EXISTS "public"."users_id_seq" INCREMENT BY 2 CYCLE;"#]
        );
    }
}
