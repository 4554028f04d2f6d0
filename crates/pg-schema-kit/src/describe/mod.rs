//! Live schema introspection.
//!
//! Each sub-describer issues one catalog or information-schema query and
//! returns results in a stable order (namespace, name, ordinal). System
//! namespaces (`pg_%`, `information_schema`) are excluded uniformly.

mod columns;
mod constraints;
mod dependencies;
mod enums;
mod extensions;
mod functions;
mod indexes;
mod sequences;
mod tables;
mod triggers;
mod views;

pub use columns::ColumnDescription;
pub use constraints::ConstraintDescription;
pub use dependencies::{
    describe_column_dependencies, describe_enum_dependencies, ColumnDependency, EnumDependency,
};
pub use enums::{describe_enums, EnumDescription};
pub use extensions::{describe_extensions, ExtensionDescription};
pub use functions::{describe_functions, FunctionDescription};
pub use indexes::IndexDescription;
pub use sequences::{describe_sequences, SequenceDescription};
pub use tables::{describe_tables, TableDescription};
pub use triggers::{describe_triggers, TriggerDescription};
pub use views::{describe_views, ViewDescription};

use serde::{Deserialize, Serialize};

use crate::db::Handle;
use crate::error::Result;

/// Everything the toolkit knows about one schema: the input and output of
/// drift comparison, and the JSON payload of a stored expected schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub extensions: Vec<ExtensionDescription>,
    pub enums: Vec<EnumDescription>,
    pub functions: Vec<FunctionDescription>,
    pub tables: Vec<TableDescription>,
    pub sequences: Vec<SequenceDescription>,
    pub views: Vec<ViewDescription>,
    pub triggers: Vec<TriggerDescription>,
    pub enum_dependencies: Vec<EnumDependency>,
    pub column_dependencies: Vec<ColumnDependency>,
}

impl SchemaDescription {
    /// Parse a schema description from its JSON wire format.
    pub fn from_json(data: &str) -> Result<SchemaDescription> {
        Ok(serde_json::from_str(data)?)
    }

    /// Render the JSON wire format used to persist expected schemas.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Describe the connected database's schema.
pub async fn describe_schema(db: &Handle) -> Result<SchemaDescription> {
    Ok(SchemaDescription {
        extensions: describe_extensions(db).await?,
        enums: describe_enums(db).await?,
        functions: describe_functions(db).await?,
        tables: describe_tables(db).await?,
        sequences: describe_sequences(db).await?,
        views: describe_views(db).await?,
        triggers: describe_triggers(db).await?,
        enum_dependencies: describe_enum_dependencies(db).await?,
        column_dependencies: describe_column_dependencies(db).await?,
    })
}

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A schema-qualified object key, e.g. `"public"."users"`.
pub(crate) fn qualified(namespace: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(name))
}

/// Interpret SQL-standard YES_NO values (and booleans rendered as text).
pub(crate) fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified() {
        assert_eq!(qualified("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_json_round_trip() {
        let schema = SchemaDescription {
            enums: vec![EnumDescription {
                namespace: "public".to_string(),
                name: "mood".to_string(),
                labels: vec!["sad".to_string(), "ok".to_string(), "happy".to_string()],
            }],
            ..SchemaDescription::default()
        };

        let round_tripped =
            SchemaDescription::from_json(&schema.to_json().expect("serializable"))
                .expect("deserializable");
        assert_eq!(round_tripped, schema);
    }

    #[test]
    fn test_truthy() {
        assert!(truthy("YES"));
        assert!(truthy("yes"));
        assert!(truthy("true"));
        assert!(!truthy("NO"));
        assert!(!truthy(""));
    }
}
