//! Parameterised SQL statements and the dialect strategies.
//!
//! The compiler returns a [`Statement`]: SQL text plus an ordered parameter
//! list. User values only ever travel through the parameters; identifiers are
//! validated against a conservative allow-list before they reach SQL text.

mod compile;
mod dialect;
#[cfg(test)]
mod tests;

pub use compile::{Generator, validate_ident};
pub use dialect::{Dialect, PostgresDialect, SqliteDialect};

use serde_json::Value;

/// One executable statement: SQL with `?N` / `$N` placeholders and the
/// values bound to them, in placeholder order.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// A statement with no parameters (DDL).
    pub fn bare(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// A bound parameter value.
///
/// Comparison literals bind as doubles/text/bools; whole documents and
/// patches bind as JSON (text on SQLite, jsonb on PostgreSQL).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Float(f64),
    Text(String),
    Json(Value),
}

static PG_NULL: Option<Value> = None;

impl SqlParam {
    /// Borrow as a tokio-postgres parameter.
    pub(crate) fn as_pg(&self) -> &(dyn tokio_postgres::types::ToSql + Sync) {
        match self {
            SqlParam::Null => &PG_NULL,
            SqlParam::Bool(b) => b,
            SqlParam::Float(f) => f,
            SqlParam::Text(s) => s,
            SqlParam::Json(v) => v,
        }
    }
}

impl rusqlite::ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
        Ok(match self {
            SqlParam::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlParam::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
            SqlParam::Float(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            SqlParam::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParam::Json(v) => ToSqlOutput::Owned(SqliteValue::Text(v.to_string())),
        })
    }
}

/// How the rows of a compiled SELECT decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// One `data` column: each row is a whole document.
    Document,
    /// N projected columns: each row is a tuple, surfaced as a JSON array.
    Tuple(usize),
}
