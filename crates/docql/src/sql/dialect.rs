//! The two JSON/SQL dialects.
//!
//! Everything backend-specific about SQL text lives behind [`Dialect`]:
//! placeholder style, identifier quoting, JSON extraction, array iteration,
//! merge patches, timestamp casts, and DDL. The compiler itself is
//! dialect-free.

use serde_json::{Map, Value};

use crate::path::{Step, is_bare_key};
use crate::sql::SqlParam;

/// Backend-specific SQL snippets.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// The Nth placeholder, 1-based.
    fn placeholder(&self, n: usize) -> String;

    /// Double-quote an already-validated identifier.
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Qualified table reference for a schema/table pair.
    fn table_ref(&self, schema: &str, table: &str) -> String;

    /// JSON-valued extraction of a path.
    fn extract_scalar(&self, col: &str, steps: &[Step]) -> String;

    /// Text-valued extraction, for text comparison and null tests.
    fn extract_text(&self, col: &str, steps: &[Step]) -> String;

    /// Numeric extraction, for numeric comparison and aggregation.
    fn extract_number(&self, col: &str, steps: &[Step]) -> String;

    /// Boolean extraction.
    fn extract_bool(&self, col: &str, steps: &[Step]) -> String;

    /// Array iteration for a wildcard path: a JSON-array-valued expression
    /// collecting `inner` from every element of the array at `outer`, NULL
    /// when `outer` is missing or not an array.
    fn iterate_array(&self, col: &str, outer: &[Step], inner: &[Step]) -> String;

    /// Wrap a plain extraction for the select list so it decodes as JSON.
    fn wrap_column(&self, expr: &str) -> String;

    /// Wrap an aggregate for the select list so it decodes as JSON.
    fn wrap_aggregate(&self, expr: &str) -> String;

    /// Coerce a text extraction to a timestamp for `min_ts` / `max_ts`.
    fn cast_timestamp(&self, expr: &str) -> String;

    /// A glob predicate over `expr`. `pattern` uses `*` as the wildcard.
    fn like_predicate(
        &self,
        expr: &str,
        pattern: &str,
        insensitive: bool,
        params: &mut Vec<SqlParam>,
    ) -> String;

    /// The `SET …` assignment merging `keys` out of `patch` into `col`.
    fn merge_patch(
        &self,
        col: &str,
        keys: &[String],
        patch: &Map<String, Value>,
        params: &mut Vec<SqlParam>,
    ) -> String;

    /// A JSON value expression for INSERT / full overwrite.
    fn json_value(&self, doc: &Value, params: &mut Vec<SqlParam>) -> String;

    /// NULL placement suffix for ORDER BY, chosen to behave identically
    /// across backends (SQLite sorts NULL first ascending, last descending).
    fn order_nulls(&self, ascending: bool) -> &'static str;

    /// Statements creating the document table (and schema) on demand.
    fn create_table_sql(&self, schema: &str, table: &str) -> Vec<String>;

    /// An expression index over a JSON path.
    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index: &str,
        steps: &[Step],
        unique: bool,
    ) -> String;

    /// One-row query probing whether the table exists; binds schema and
    /// table name as text parameters.
    fn table_exists_sql(&self, schema: &str, table: &str) -> (String, Vec<SqlParam>);
}

/// Escape a string for inclusion as a SQL text literal.
fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// ==================== embedded (SQLite) ====================

/// The embedded dialect: SQLite with the JSON1 functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

/// Render steps as a SQLite JSON path literal, e.g. `'$.a."odd key"[0]'`.
fn sqlite_json_path(steps: &[Step]) -> String {
    let mut path = String::from("$");
    for step in steps {
        match step {
            Step::Key(k) if is_bare_key(k) => {
                path.push('.');
                path.push_str(k);
            }
            Step::Key(k) => {
                path.push_str(&format!(".\"{k}\""));
            }
            Step::Index(i) => {
                path.push_str(&format!("[{i}]"));
            }
        }
    }
    sql_str(&path)
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("?{n}")
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        // SQLite has no schemas; the tenant is folded into the table name.
        self.quote_ident(&format!("{schema}_{table}"))
    }

    fn extract_scalar(&self, col: &str, steps: &[Step]) -> String {
        format!("json_extract({col}, {})", sqlite_json_path(steps))
    }

    fn extract_text(&self, col: &str, steps: &[Step]) -> String {
        self.extract_scalar(col, steps)
    }

    fn extract_number(&self, col: &str, steps: &[Step]) -> String {
        self.extract_scalar(col, steps)
    }

    fn extract_bool(&self, col: &str, steps: &[Step]) -> String {
        self.extract_scalar(col, steps)
    }

    fn iterate_array(&self, col: &str, outer: &[Step], inner: &[Step]) -> String {
        let outer_path = sqlite_json_path(outer);
        let element = if inner.is_empty() {
            "el.value".to_string()
        } else {
            format!("json_extract(el.value, {})", sqlite_json_path(inner))
        };
        format!(
            "CASE WHEN json_type({col}, {outer_path}) = 'array' THEN \
             (SELECT COALESCE(json_group_array({element}), json('[]')) \
             FROM json_each(json_extract({col}, {outer_path})) AS el) END"
        )
    }

    fn wrap_column(&self, expr: &str) -> String {
        format!("json_quote({expr})")
    }

    fn wrap_aggregate(&self, expr: &str) -> String {
        format!("json_quote({expr})")
    }

    fn cast_timestamp(&self, expr: &str) -> String {
        format!("datetime({expr})")
    }

    fn like_predicate(
        &self,
        expr: &str,
        pattern: &str,
        insensitive: bool,
        params: &mut Vec<SqlParam>,
    ) -> String {
        if insensitive {
            // SQLite LIKE is case-insensitive for ASCII.
            params.push(SqlParam::Text(glob_to_like(pattern)));
            format!("{expr} LIKE {} ESCAPE '\\'", self.placeholder(params.len()))
        } else {
            // GLOB is case-sensitive and uses `*` natively.
            params.push(SqlParam::Text(pattern.to_string()));
            format!("{expr} GLOB {}", self.placeholder(params.len()))
        }
    }

    fn merge_patch(
        &self,
        col: &str,
        keys: &[String],
        patch: &Map<String, Value>,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let mut sql = format!("{col} = json_set({col}");
        for key in keys {
            let value = patch.get(key).cloned().unwrap_or(Value::Null);
            params.push(SqlParam::Json(value));
            sql.push_str(&format!(
                ", {}, json({})",
                sqlite_json_path(&[Step::Key(key.clone())]),
                self.placeholder(params.len())
            ));
        }
        sql.push(')');
        sql
    }

    fn json_value(&self, doc: &Value, params: &mut Vec<SqlParam>) -> String {
        params.push(SqlParam::Json(doc.clone()));
        format!("json({})", self.placeholder(params.len()))
    }

    fn order_nulls(&self, _ascending: bool) -> &'static str {
        ""
    }

    fn create_table_sql(&self, schema: &str, table: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (data TEXT)",
            self.table_ref(schema, table)
        )]
    }

    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index: &str,
        steps: &[Step],
        unique: bool,
    ) -> String {
        let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
        format!(
            "CREATE {kind} IF NOT EXISTS {} ON {} (json_extract(data, {}))",
            self.quote_ident(index),
            self.table_ref(schema, table),
            sqlite_json_path(steps)
        )
    }

    fn table_exists_sql(&self, schema: &str, table: &str) -> (String, Vec<SqlParam>) {
        (
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1".to_string(),
            vec![SqlParam::Text(format!("{schema}_{table}"))],
        )
    }
}

// ==================== server (PostgreSQL) ====================

/// The server dialect: PostgreSQL jsonb.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

/// Render steps as a jsonb path-array literal, e.g. `'{a,"odd key",0}'`.
fn pg_json_path(steps: &[Step]) -> String {
    let elements: Vec<String> = steps
        .iter()
        .map(|step| match step {
            Step::Key(k) if is_bare_key(k) => k.clone(),
            Step::Key(k) => format!("\"{}\"", k.replace('\\', "\\\\")),
            Step::Index(i) => i.to_string(),
        })
        .collect();
    sql_str(&format!("{{{}}}", elements.join(",")))
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    fn extract_scalar(&self, col: &str, steps: &[Step]) -> String {
        format!("{col} #> {}", pg_json_path(steps))
    }

    fn extract_text(&self, col: &str, steps: &[Step]) -> String {
        format!("{col} #>> {}", pg_json_path(steps))
    }

    fn extract_number(&self, col: &str, steps: &[Step]) -> String {
        format!("({col} #>> {})::float8", pg_json_path(steps))
    }

    fn extract_bool(&self, col: &str, steps: &[Step]) -> String {
        format!("({col} #>> {})::boolean", pg_json_path(steps))
    }

    fn iterate_array(&self, col: &str, outer: &[Step], inner: &[Step]) -> String {
        let outer_expr = self.extract_scalar(col, outer);
        let element = if inner.is_empty() {
            "el.value".to_string()
        } else {
            format!("el.value #> {}", pg_json_path(inner))
        };
        format!(
            "CASE WHEN jsonb_typeof({outer_expr}) = 'array' THEN \
             (SELECT COALESCE(jsonb_agg({element}), '[]'::jsonb) \
             FROM jsonb_array_elements({outer_expr}) AS el(value)) END"
        )
    }

    fn wrap_column(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn wrap_aggregate(&self, expr: &str) -> String {
        format!("to_jsonb({expr})")
    }

    fn cast_timestamp(&self, expr: &str) -> String {
        format!("({expr})::timestamptz")
    }

    fn like_predicate(
        &self,
        expr: &str,
        pattern: &str,
        insensitive: bool,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let operator = if insensitive { "ILIKE" } else { "LIKE" };
        params.push(SqlParam::Text(glob_to_like(pattern)));
        format!("{expr} {operator} {}", self.placeholder(params.len()))
    }

    fn merge_patch(
        &self,
        col: &str,
        keys: &[String],
        patch: &Map<String, Value>,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let mut merged = Map::new();
        for key in keys {
            merged.insert(key.clone(), patch.get(key).cloned().unwrap_or(Value::Null));
        }
        params.push(SqlParam::Json(Value::Object(merged)));
        format!(
            "{col} = {col} || {}::jsonb",
            self.placeholder(params.len())
        )
    }

    fn json_value(&self, doc: &Value, params: &mut Vec<SqlParam>) -> String {
        params.push(SqlParam::Json(doc.clone()));
        self.placeholder(params.len())
    }

    fn order_nulls(&self, ascending: bool) -> &'static str {
        if ascending { " NULLS FIRST" } else { " NULLS LAST" }
    }

    fn create_table_sql(&self, schema: &str, table: &str) -> Vec<String> {
        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote_ident(schema)),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (data jsonb NOT NULL)",
                self.table_ref(schema, table)
            ),
        ]
    }

    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index: &str,
        steps: &[Step],
        unique: bool,
    ) -> String {
        let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
        format!(
            "CREATE {kind} IF NOT EXISTS {} ON {} ((data #>> {}))",
            self.quote_ident(index),
            self.table_ref(schema, table),
            pg_json_path(steps)
        )
    }

    fn table_exists_sql(&self, schema: &str, table: &str) -> (String, Vec<SqlParam>) {
        (
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2"
                .to_string(),
            vec![
                SqlParam::Text(schema.to_string()),
                SqlParam::Text(table.to_string()),
            ],
        )
    }
}

/// Translate a `*` glob into a LIKE pattern, escaping LIKE metacharacters.
fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
