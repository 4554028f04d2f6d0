//! Composable SQL queries with named placeholders.
//!
//! A [`Q`] is built from a template containing `{:name}` placeholders and a
//! set of bound arguments. Formatting produces positional `$1..$n` SQL plus
//! the argument list in positional order. A bound argument may itself be a
//! `Q`, which is spliced into the parent with its placeholder indices
//! rebased past the parent's.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio_postgres::types::ToSql;

/// A single owned SQL parameter value.
pub type SqlParam = Arc<dyn ToSql + Sync + Send>;

/// Box a value for use as a SQL parameter.
pub fn sql_param<T: ToSql + Sync + Send + 'static>(value: T) -> SqlParam {
    Arc::new(value)
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{:(\w+)\}").expect("placeholder pattern is valid"));

/// An argument bound into a query template: either a parameter value or a
/// nested query to splice.
pub enum Arg {
    Value(SqlParam),
    Query(Q),
}

impl Arg {
    /// Bind a parameter value.
    pub fn value<T: ToSql + Sync + Send + 'static>(value: T) -> Arg {
        Arg::Value(sql_param(value))
    }
}

/// Conversion into an [`Arg`]. Implemented for common scalar types, their
/// `Option`s, and for [`Q`] itself (sub-query splicing).
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

impl IntoArg for Q {
    fn into_arg(self) -> Arg {
        Arg::Query(self)
    }
}

impl IntoArg for &Q {
    fn into_arg(self) -> Arg {
        Arg::Query(self.clone())
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Arg {
        Arg::value(self.to_string())
    }
}

impl IntoArg for Option<&str> {
    fn into_arg(self) -> Arg {
        Arg::value(self.map(str::to_string))
    }
}

macro_rules! impl_into_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Arg {
                    Arg::value(self)
                }
            }

            impl IntoArg for Option<$ty> {
                fn into_arg(self) -> Arg {
                    Arg::value(self)
                }
            }
        )*
    };
}

impl_into_arg!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<String>,
    chrono::DateTime<chrono::Utc>,
);

/// Named argument bindings for [`Q::new`].
#[derive(Default)]
pub struct Args {
    entries: Vec<(String, Arg)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a value or sub-query. Later bindings shadow earlier
    /// ones of the same name.
    pub fn insert(&mut self, name: &str, value: impl IntoArg) {
        self.entries.push((name.to_string(), value.into_arg()));
    }

    fn get(&self, name: &str) -> Option<&Arg> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, arg)| arg)
    }
}

/// Build an [`Args`] set from `"name" => value` pairs.
#[macro_export]
macro_rules! args {
    () => { $crate::query::Args::new() };
    ($($name:literal => $value:expr),+ $(,)?) => {{
        let mut args = $crate::query::Args::new();
        $(args.insert($name, $value);)+
        args
    }};
}

#[derive(Clone, Debug)]
enum Fragment {
    Literal(String),
    // 1-based positional placeholder index
    Placeholder(usize),
}

/// An immutable composed query.
#[derive(Clone)]
pub struct Q {
    fragments: Vec<Fragment>,
    placeholders: usize,
    args: Vec<SqlParam>,
}

impl Q {
    /// Parse `template`, resolving each `{:name}` placeholder against
    /// `args`. Repeated names share one positional slot; a `Q` argument is
    /// spliced in place with its placeholders rebased. Text not matching
    /// `{:\w+}` is literal, including braces without the `:` prefix.
    ///
    /// # Panics
    ///
    /// Panics if a placeholder has no binding. A malformed template is a
    /// programmer error, not a runtime condition.
    pub fn new(template: &str, args: Args) -> Q {
        let mut fragments = Vec::new();
        let mut bound: Vec<SqlParam> = Vec::new();
        let mut placeholders = 0usize;
        let mut index_by_name: HashMap<String, usize> = HashMap::new();
        let mut offset = 0usize;

        for caps in PLACEHOLDER.captures_iter(template) {
            let token = caps.get(0).expect("regex match has a full capture");
            let name = &caps[1];

            if token.start() > offset {
                fragments.push(Fragment::Literal(template[offset..token.start()].to_string()));
            }
            offset = token.end();

            match args.get(name) {
                None => panic!("no argument bound for {name:?}"),
                Some(Arg::Query(sub)) => {
                    // Splice the sub-query, shifting its placeholder indices
                    // past every slot allocated so far.
                    for fragment in &sub.fragments {
                        match fragment {
                            Fragment::Literal(text) => {
                                fragments.push(Fragment::Literal(text.clone()));
                            }
                            Fragment::Placeholder(index) => {
                                fragments.push(Fragment::Placeholder(index + placeholders));
                            }
                        }
                    }
                    bound.extend(sub.args.iter().cloned());
                    placeholders += sub.placeholders;
                }
                Some(Arg::Value(value)) => {
                    let index = match index_by_name.get(name) {
                        Some(index) => *index,
                        None => {
                            placeholders += 1;
                            bound.push(value.clone());
                            index_by_name.insert(name.to_string(), placeholders);
                            placeholders
                        }
                    };
                    fragments.push(Fragment::Placeholder(index));
                }
            }
        }

        if offset < template.len() {
            fragments.push(Fragment::Literal(template[offset..].to_string()));
        }

        Q {
            fragments,
            placeholders,
            args: bound,
        }
    }

    /// A query that is used verbatim: no placeholder parsing, positional
    /// arguments passed through as given.
    pub fn raw(sql: impl Into<String>) -> Q {
        Q::raw_with(sql, Vec::new())
    }

    /// A verbatim query with positional arguments.
    pub fn raw_with(sql: impl Into<String>, args: Vec<SqlParam>) -> Q {
        Q {
            fragments: vec![Fragment::Literal(sql.into())],
            placeholders: 0,
            args,
        }
    }

    /// Literal SQL text for splicing identifiers and column names into a
    /// template, e.g. `args! { "col" => Q::quote("username") }`.
    pub fn quote(sql: impl Into<String>) -> Q {
        Q::raw(sql)
    }

    /// Render the SQL text with `$1..$n` placeholders and the matching
    /// positional parameter slice.
    pub fn format(&self) -> (String, Vec<&(dyn ToSql + Sync)>) {
        let mut sql = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(text) => sql.push_str(text),
                Fragment::Placeholder(index) => {
                    sql.push('$');
                    sql.push_str(&index.to_string());
                }
            }
        }

        let params = self
            .args
            .iter()
            .map(|arg| arg.as_ref() as &(dyn ToSql + Sync))
            .collect();

        (sql, params)
    }
}

impl fmt::Debug for Q {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sql, _) = self.format();
        f.debug_struct("Q")
            .field("sql", &sql)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn assert_query(q: &Q, expected_sql: &str, expected_args: &str) {
        let (sql, params) = q.format();
        assert_eq!(sql, expected_sql);
        assert_eq!(format!("{params:?}"), expected_args);
    }

    #[test]
    fn test_literal() {
        let q = Q::new("SELECT random()", args!());
        assert_query(&q, "SELECT random()", "[]");
    }

    #[test]
    fn test_simple() {
        let q = Q::new("SELECT * FROM users WHERE id = {:id}", args! { "id" => 42 });
        assert_query(&q, "SELECT * FROM users WHERE id = $1", "[42]");
    }

    #[test]
    fn test_quoted() {
        let q = Q::new(
            "SELECT {:col} FROM users",
            args! { "col" => Q::quote("username") },
        );
        assert_query(&q, "SELECT username FROM users", "[]");
    }

    #[test]
    fn test_variable_reuse() {
        let q = Q::new(
            "SELECT * FROM users WHERE (id = {:id} AND NOT blocked) OR (id != {:id} AND admin)",
            args! { "id" => 42 },
        );
        assert_query(
            &q,
            "SELECT * FROM users WHERE (id = $1 AND NOT blocked) OR (id != $1 AND admin)",
            "[42]",
        );
    }

    #[test]
    fn test_fragments() {
        let cond = Q::new(
            "WHERE name = {:name} AND age = {:age}",
            args! { "name" => "efritz", "age" => 34 },
        );
        let limit = Q::new(
            "LIMIT {:limit} OFFSET {:offset}",
            args! { "limit" => 10, "offset" => 20 },
        );
        let q = Q::new(
            "SELECT name FROM users {:cond} {:limit}",
            args! { "cond" => cond, "limit" => limit },
        );

        assert_query(
            &q,
            "SELECT name FROM users WHERE name = $1 AND age = $2 LIMIT $3 OFFSET $4",
            r#"["efritz", 34, 10, 20]"#,
        );
    }

    #[test]
    fn test_nested_subqueries() {
        let select_subquery = Q::new(
            "SELECT * FROM pairs WHERE s.key IN {:prefer}",
            args! { "prefer" => vec!["foo".to_string(), "bar".to_string()] },
        );
        let cond_subquery = Q::new(
            "SELECT s.value FROM pairs WHERE s.key IN {:avoid}",
            args! { "avoid" => vec!["bonk".to_string(), "quux".to_string()] },
        );
        let q = Q::new(
            "SELECT {:lit}, s.key, s.value FROM ({:select}) s WHERE s.key != {:avoid} AND s.value NOT IN ({:cond})",
            args! {
                "lit" => "test",
                "select" => select_subquery,
                "avoid" => "__invalid",
                "cond" => cond_subquery,
            },
        );

        assert_query(
            &q,
            "SELECT $1, s.key, s.value FROM (SELECT * FROM pairs WHERE s.key IN $2) s WHERE s.key != $3 AND s.value NOT IN (SELECT s.value FROM pairs WHERE s.key IN $4)",
            r#"["test", ["foo", "bar"], "__invalid", ["bonk", "quux"]]"#,
        );
    }

    #[test]
    fn test_nested_nested_subqueries() {
        let q1 = Q::new("SELECT {:value}", args! { "value" => "foo" });
        let q2 = Q::new(
            "SELECT z FROM inside WHERE x = {:value} AND y = ({:q})",
            args! { "value" => "bar", "q" => q1 },
        );
        let q3 = Q::new(
            "SELECT w FROM outside WHERE x = {:value} AND y = ({:q})",
            args! { "value" => "baz", "q" => q2 },
        );

        assert_query(
            &q3,
            "SELECT w FROM outside WHERE x = $1 AND y = (SELECT z FROM inside WHERE x = $2 AND y = (SELECT $3))",
            r#"["baz", "bar", "foo"]"#,
        );
    }

    #[test]
    fn test_literal_percent_operator() {
        let q = Q::new(
            "SELECT * FROM search WHERE a <<% {:term} AND document_id = {:document_id}",
            args! { "term" => "how to delete a tweet", "document_id" => 42 },
        );
        assert_query(
            &q,
            "SELECT * FROM search WHERE a <<% $1 AND document_id = $2",
            r#"["how to delete a tweet", 42]"#,
        );
    }

    #[test]
    fn test_literal_arrays() {
        let q = Q::new("SELECT * FROM products WHERE tag IN '{}'", args!());
        assert_query(&q, "SELECT * FROM products WHERE tag IN '{}'", "[]");

        let q = Q::new(
            "SELECT * FROM products WHERE tag NOT IN '{uselessjunk}'",
            args!(),
        );
        assert_query(
            &q,
            "SELECT * FROM products WHERE tag NOT IN '{uselessjunk}'",
            "[]",
        );

        let q = Q::new(
            "SELECT * FROM products WHERE tag IN '{sale,electronics}'",
            args!(),
        );
        assert_query(
            &q,
            "SELECT * FROM products WHERE tag IN '{sale,electronics}'",
            "[]",
        );
    }

    #[test]
    fn test_raw_passthrough() {
        let q = Q::raw_with(
            "INSERT INTO t (a, b) VALUES ($1, $2)",
            vec![sql_param(1i64), sql_param("x".to_string())],
        );
        assert_query(&q, "INSERT INTO t (a, b) VALUES ($1, $2)", r#"[1, "x"]"#);
    }

    #[test]
    #[should_panic(expected = "no argument bound for")]
    fn test_missing_binding_panics() {
        let _ = Q::new("SELECT {:missing}", args!());
    }
}
