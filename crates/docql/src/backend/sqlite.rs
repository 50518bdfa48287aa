//! The embedded engine: rusqlite behind a mutex.
//!
//! Every function here is synchronous and runs on the blocking pool. One
//! public call maps to one transaction on the single shared connection;
//! dropping an uncommitted [`rusqlite::Transaction`] rolls it back on every
//! error path.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};

use crate::ast::UriQuery;
use crate::audit::{self, AuditContext, AuditEvent, AuditRecord};
use crate::backend::{
    audit_table_name, decode_sqlite_row, ensure_audit_stmts, previous_key_steps,
    primary_key_steps,
};
use crate::error::{StoreError, StoreResult};
use crate::sql::{Generator, RowShape, SqliteDialect, Statement};
use crate::store::{RestoreReport, StoreOptions};

fn lock(conn: &Arc<Mutex<Connection>>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::backend("embedded connection poisoned"))
}

fn execute(conn: &Connection, stmt: &Statement) -> StoreResult<usize> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "sqlite execute");
    conn.execute(&stmt.sql, params_from_iter(stmt.params.iter()))
        .map_err(StoreError::from)
}

fn query_shaped(conn: &Connection, stmt: &Statement, shape: RowShape) -> StoreResult<Vec<Value>> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "sqlite query");
    let mut prepared = conn.prepare(&stmt.sql)?;
    let mut rows = prepared.query(params_from_iter(stmt.params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_sqlite_row(row, shape)?);
    }
    Ok(out)
}

fn query_docs(conn: &Connection, stmt: &Statement) -> StoreResult<Vec<Value>> {
    query_shaped(conn, stmt, RowShape::Document)
}

fn has_rows(conn: &Connection, stmt: &Statement) -> StoreResult<bool> {
    let mut prepared = conn.prepare(&stmt.sql)?;
    let mut rows = prepared.query(params_from_iter(stmt.params.iter()))?;
    Ok(rows.next()?.is_some())
}

pub(crate) fn insert(
    conn: &Arc<Mutex<Connection>>,
    opts: &StoreOptions,
    table: &str,
    docs: &[Value],
    q: &UriQuery,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = SqliteDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;

    let mut stmts = table_gen.create_table();
    stmts.extend(ensure_audit_stmts(&audit_gen));
    if let Some(pk) = &q.primary_key {
        let steps = primary_key_steps(pk)?;
        stmts.push(table_gen.create_index(&steps, true));
        stmts.push(audit_gen.create_index(&previous_key_steps(&steps), false));
    }
    for doc in docs {
        stmts.push(table_gen.insert(doc));
        if opts.audit_create {
            let record = ctx.record(AuditEvent::Create, None, None);
            stmts.push(audit_gen.insert(&record.to_doc()));
        }
    }

    let mut guard = lock(conn)?;
    let tx = guard.transaction()?;
    for stmt in &stmts {
        execute(&tx, stmt)?;
    }
    tx.commit()?;
    Ok(docs.len() as u64)
}

pub(crate) fn select(
    conn: &Arc<Mutex<Connection>>,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    read_ctx: Option<&AuditContext>,
) -> StoreResult<Vec<Value>> {
    let dialect = SqliteDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let (stmt, shape) = table_gen.select(q)?;

    let mut guard = lock(conn)?;
    let tx = guard.transaction()?;
    if let Some(ctx) = read_ctx {
        let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
        for ddl in ensure_audit_stmts(&audit_gen) {
            execute(&tx, &ddl)?;
        }
        let record = ctx.record(AuditEvent::Read, None, None);
        execute(&tx, &audit_gen.insert(&record.to_doc()))?;
    }
    let rows = query_shaped(&tx, &stmt, shape)?;
    tx.commit()?;
    Ok(rows)
}

pub(crate) fn update(
    conn: &Arc<Mutex<Connection>>,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    set_keys: &[String],
    patch: &Map<String, Value>,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = SqliteDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let capture = table_gen.select_documents(q)?;
    let mutation = table_gen.update(q, set_keys, patch)?;

    let mut guard = lock(conn)?;
    let tx = guard.transaction()?;
    for ddl in ensure_audit_stmts(&audit_gen) {
        execute(&tx, &ddl)?;
    }
    let previous_docs = query_docs(&tx, &capture)?;
    let changed = execute(&tx, &mutation)? as u64;
    let diff = audit::update_diff(patch, set_keys);
    for previous in previous_docs {
        let record = ctx.record(AuditEvent::Update, Some(previous), Some(diff.clone()));
        execute(&tx, &audit_gen.insert(&record.to_doc()))?;
    }
    tx.commit()?;
    Ok(changed)
}

pub(crate) fn delete(
    conn: &Arc<Mutex<Connection>>,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    confirm_mass_delete: bool,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = SqliteDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let capture = table_gen.select_documents(q)?;
    let mutation = table_gen.delete(q, confirm_mass_delete)?;

    let mut guard = lock(conn)?;
    let tx = guard.transaction()?;
    for ddl in ensure_audit_stmts(&audit_gen) {
        execute(&tx, &ddl)?;
    }
    let previous_docs = query_docs(&tx, &capture)?;
    let removed = execute(&tx, &mutation)? as u64;
    for previous in previous_docs {
        let record = ctx.record(AuditEvent::Delete, Some(previous), None);
        execute(&tx, &audit_gen.insert(&record.to_doc()))?;
    }
    tx.commit()?;
    Ok(removed)
}

pub(crate) fn restore(
    conn: &Arc<Mutex<Connection>>,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    ctx: &AuditContext,
) -> StoreResult<RestoreReport> {
    let dialect = SqliteDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let pk = q
        .primary_key
        .as_ref()
        .ok_or_else(|| StoreError::validation("restore requires a primary_key= clause"))?;
    let key_steps = primary_key_steps(pk)?;

    let mut guard = lock(conn)?;
    let tx = guard.transaction()?;

    let probe = audit_gen.table_exists();
    if !has_rows(&tx, &probe)? {
        return Err(StoreError::AuditMissing(format!(
            "table '{table}' has no audit journal"
        )));
    }
    execute(&tx, &audit_gen.create_index(&previous_key_steps(&key_steps), false))?;

    let audit_docs = query_docs(&tx, &audit_gen.select_documents(q)?)?;
    let records: Vec<AuditRecord> = audit_docs
        .into_iter()
        .filter_map(AuditRecord::from_doc)
        .collect();
    if records.is_empty() {
        return Err(StoreError::AuditMissing(
            "no audit rows match the restore query".to_string(),
        ));
    }

    let mut report = RestoreReport::default();
    for item in audit::restore_plan(&records, pk) {
        let current = query_docs(&tx, &table_gen.select_by_key(&key_steps, &item.key_literal)?)?;
        if current.len() > 1 {
            return Err(StoreError::Integrity(format!(
                "primary key {} matches {} rows",
                item.key,
                current.len()
            )));
        }
        match current.into_iter().next() {
            None => {
                execute(&tx, &table_gen.insert(&item.target))?;
                let record = ctx.record(AuditEvent::Create, None, None);
                execute(&tx, &audit_gen.insert(&record.to_doc()))?;
                report.inserted.push(item.key);
            }
            Some(current) if current != item.target => {
                execute(
                    &tx,
                    &table_gen.overwrite_by_key(&key_steps, &item.key_literal, &item.target)?,
                )?;
                let record = ctx.record(AuditEvent::Update, Some(current), None);
                execute(&tx, &audit_gen.insert(&record.to_doc()))?;
                report.updated.push(item.key);
            }
            Some(_) => {}
        }
    }
    tx.commit()?;
    Ok(report)
}
