//! Backend execution: one module per engine plus shared row decoding.

pub(crate) mod postgres;
pub(crate) mod sqlite;
pub(crate) mod stream;

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::path::Step;
use crate::sql::{Generator, RowShape, Statement};

/// The connection source a [`crate::Store`] executes against.
pub(crate) enum Backend {
    /// A single embedded connection, shared behind a mutex and driven from
    /// the blocking pool.
    Sqlite(Arc<Mutex<rusqlite::Connection>>),
    /// A pooled server connection source.
    Postgres(deadpool_postgres::Pool),
}

/// The journal table that shadows `table`.
pub(crate) fn audit_table_name(table: &str) -> String {
    format!("{table}_audit")
}

/// DDL bringing the audit table (and its timestamp index) into existence.
pub(crate) fn ensure_audit_stmts(audit_gen: &Generator<'_>) -> Vec<Statement> {
    let mut stmts = audit_gen.create_table();
    stmts.push(audit_gen.create_index(&[Step::Key("timestamp".to_string())], false));
    stmts
}

/// Flatten a primary-key path into extraction steps.
pub(crate) fn primary_key_steps(pk: &crate::path::Path) -> StoreResult<Vec<Step>> {
    match pk.shape()? {
        crate::path::PathShape::Simple(steps) => Ok(steps),
        crate::path::PathShape::Wild { .. } => Err(StoreError::validation(format!(
            "primary_key path '{pk}' may not contain a wildcard"
        ))),
    }
}

/// The same key steps, addressed inside an audit row's `previous` field.
pub(crate) fn previous_key_steps(steps: &[Step]) -> Vec<Step> {
    let mut prefixed = Vec::with_capacity(steps.len() + 1);
    prefixed.push(Step::Key("previous".to_string()));
    prefixed.extend(steps.iter().cloned());
    prefixed
}

/// Decode one embedded row into a document or projected tuple.
pub(crate) fn decode_sqlite_row(row: &rusqlite::Row<'_>, shape: RowShape) -> StoreResult<Value> {
    use rusqlite::types::ValueRef;

    let column = |i: usize| -> StoreResult<Value> {
        Ok(match row.get_ref(i).map_err(StoreError::from)? {
            ValueRef::Null => Value::Null,
            ValueRef::Text(text) => serde_json::from_slice(text)?,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Blob(_) => {
                return Err(StoreError::backend("unexpected blob column in result"));
            }
        })
    };

    match shape {
        RowShape::Document => column(0),
        RowShape::Tuple(n) => {
            let mut columns = Vec::with_capacity(n);
            for i in 0..n {
                columns.push(column(i)?);
            }
            Ok(Value::Array(columns))
        }
    }
}

/// Decode one server row into a document or projected tuple.
pub(crate) fn decode_pg_row(row: &tokio_postgres::Row, shape: RowShape) -> StoreResult<Value> {
    let column = |i: usize| -> StoreResult<Value> {
        row.try_get::<_, Option<Value>>(i)
            .map(|v| v.unwrap_or(Value::Null))
            .map_err(|e| StoreError::backend(format!("column {i} decode: {e}")))
    };

    match shape {
        RowShape::Document => column(0),
        RowShape::Tuple(n) => {
            let mut columns = Vec::with_capacity(n);
            for i in 0..n {
                columns.push(column(i)?);
            }
            Ok(Value::Array(columns))
        }
    }
}
