use super::{Modifier, ObjectType};
use crate::describe::{qualified, SchemaDescription, ViewDescription};

pub(super) struct ViewModifier<'s> {
    d: &'s ViewDescription,
}

pub(super) fn modifiers(schema: &SchemaDescription) -> Vec<ViewModifier<'_>> {
    schema.views.iter().map(|d| ViewModifier { d }).collect()
}

impl Modifier for ViewModifier<'_> {
    type Desc = ViewDescription;

    fn key(&self) -> String {
        qualified(&self.d.namespace, &self.d.name)
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::View
    }

    fn description(&self) -> &ViewDescription {
        self.d
    }

    fn create_sql(&self) -> String {
        create_view_sql(&self.key(), &self.d.definition)
    }

    fn drop_sql(&self) -> String {
        format!("DROP VIEW IF EXISTS {};", self.key())
    }
}

/// The catalog stores view definitions with the indentation of the original
/// `CREATE VIEW`; re-issuing them reads better with the common indent
/// stripped.
pub(super) fn create_view_sql(key: &str, definition: &str) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS {}",
        key,
        strip_indent(&format!(" {definition}")).trim()
    )
}

fn strip_indent(s: &str) -> String {
    let lines: Vec<&str> = s.trim_end_matches('\n').split('\n').collect();

    let mut min = lines[0].len();
    for line in &lines {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent < min {
            min = indent;
        }
    }

    lines
        .iter()
        .map(|line| &line[min..])
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_indent() {
        for (name, input, expected) in [
            (
                "single line",
                "CREATE VIEW IF NOT EXISTS v AS SELECT 1;",
                "CREATE VIEW IF NOT EXISTS v AS SELECT 1;",
            ),
            (
                "single line with indent",
                "  CREATE VIEW IF NOT EXISTS v AS SELECT 1;",
                "CREATE VIEW IF NOT EXISTS v AS SELECT 1;",
            ),
            (
                "multi line, common indent",
                "  CREATE VIEW IF NOT EXISTS v AS\n  SELECT 1;",
                "CREATE VIEW IF NOT EXISTS v AS\nSELECT 1;",
            ),
            (
                "multi line, jagged indent",
                "  CREATE VIEW IF NOT EXISTS v AS\n    SELECT *\n    FROM t;",
                "CREATE VIEW IF NOT EXISTS v AS\n  SELECT *\n  FROM t;",
            ),
        ] {
            assert_eq!(strip_indent(input), expected, "{name}");
        }
    }

    #[test]
    fn test_create_view_sql() {
        let description = ViewDescription {
            namespace: "public".to_string(),
            name: "v_foo".to_string(),
            definition: " SELECT *\n   FROM t;".to_string(),
        };
        let modifier = ViewModifier { d: &description };

        assert_eq!(
            modifier.create_sql(),
            "CREATE OR REPLACE VIEW \"public\".\"v_foo\" AS SELECT *\n FROM t;"
        );
    }
}
