//! The server engine: pooled tokio-postgres connections.
//!
//! One public call maps to one `SERIALIZABLE` transaction on one pooled
//! connection. An uncommitted [`tokio_postgres::Transaction`] rolls back
//! when dropped, so `?` early returns never leave partial effects behind.

use deadpool_postgres::{Pool, Transaction};
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use tokio_postgres::IsolationLevel;

use crate::ast::UriQuery;
use crate::audit::{self, AuditContext, AuditEvent, AuditRecord};
use crate::backend::stream::DocStream;
use crate::backend::{
    audit_table_name, decode_pg_row, ensure_audit_stmts, previous_key_steps, primary_key_steps,
};
use crate::error::{StoreError, StoreResult};
use crate::sql::{Generator, PostgresDialect, RowShape, Statement};
use crate::store::{RestoreReport, StoreOptions};

fn param_refs(stmt: &Statement) -> Vec<&(dyn ToSql + Sync)> {
    stmt.params.iter().map(|p| p.as_pg()).collect()
}

async fn execute(tx: &Transaction<'_>, stmt: &Statement) -> StoreResult<u64> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "postgres execute");
    tx.execute(stmt.sql.as_str(), &param_refs(stmt))
        .await
        .map_err(StoreError::from_pg_error)
}

async fn query_shaped(
    tx: &Transaction<'_>,
    stmt: &Statement,
    shape: RowShape,
) -> StoreResult<Vec<Value>> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "postgres query");
    let rows = tx
        .query(stmt.sql.as_str(), &param_refs(stmt))
        .await
        .map_err(StoreError::from_pg_error)?;
    rows.iter().map(|row| decode_pg_row(row, shape)).collect()
}

async fn query_docs(tx: &Transaction<'_>, stmt: &Statement) -> StoreResult<Vec<Value>> {
    query_shaped(tx, stmt, RowShape::Document).await
}

async fn has_rows(tx: &Transaction<'_>, stmt: &Statement) -> StoreResult<bool> {
    let rows = tx
        .query(stmt.sql.as_str(), &param_refs(stmt))
        .await
        .map_err(StoreError::from_pg_error)?;
    Ok(!rows.is_empty())
}

async fn begin(client: &mut deadpool_postgres::Client) -> StoreResult<Transaction<'_>> {
    client
        .build_transaction()
        .isolation_level(IsolationLevel::Serializable)
        .start()
        .await
        .map_err(StoreError::from_pg_error)
}

pub(crate) async fn insert(
    pool: &Pool,
    opts: &StoreOptions,
    table: &str,
    docs: &[Value],
    q: &UriQuery,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = PostgresDialect;
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

    let mut client = pool.get().await?;
    let tx = begin(&mut client).await?;
    for stmt in &stmts {
        execute(&tx, stmt).await?;
    }
    tx.commit().await.map_err(StoreError::from_pg_error)?;
    Ok(docs.len() as u64)
}

pub(crate) async fn select(
    pool: &Pool,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    read_ctx: Option<&AuditContext>,
) -> StoreResult<DocStream> {
    let dialect = PostgresDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let (stmt, shape) = table_gen.select(q)?;

    let mut client = pool.get().await?;
    if let Some(ctx) = read_ctx {
        let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
        let tx = begin(&mut client).await?;
        for ddl in ensure_audit_stmts(&audit_gen) {
            execute(&tx, &ddl).await?;
        }
        let record = ctx.record(AuditEvent::Read, None, None);
        execute(&tx, &audit_gen.insert(&record.to_doc())).await?;
        tx.commit().await.map_err(StoreError::from_pg_error)?;
    }

    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "postgres stream");
    let rows = client
        .query_raw(stmt.sql.as_str(), stmt.params.iter().map(|p| p.as_pg()))
        .await
        .map_err(StoreError::from_pg_error)?;
    Ok(DocStream::postgres(client, rows, shape))
}

pub(crate) async fn update(
    pool: &Pool,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    set_keys: &[String],
    patch: &Map<String, Value>,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = PostgresDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let capture = table_gen.select_documents(q)?;
    let mutation = table_gen.update(q, set_keys, patch)?;

    let mut client = pool.get().await?;
    let tx = begin(&mut client).await?;
    for ddl in ensure_audit_stmts(&audit_gen) {
        execute(&tx, &ddl).await?;
    }
    let previous_docs = query_docs(&tx, &capture).await?;
    let changed = execute(&tx, &mutation).await?;
    let diff = audit::update_diff(patch, set_keys);
    for previous in previous_docs {
        let record = ctx.record(AuditEvent::Update, Some(previous), Some(diff.clone()));
        execute(&tx, &audit_gen.insert(&record.to_doc())).await?;
    }
    tx.commit().await.map_err(StoreError::from_pg_error)?;
    Ok(changed)
}

pub(crate) async fn delete(
    pool: &Pool,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    confirm_mass_delete: bool,
    ctx: &AuditContext,
) -> StoreResult<u64> {
    let dialect = PostgresDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let capture = table_gen.select_documents(q)?;
    let mutation = table_gen.delete(q, confirm_mass_delete)?;

    let mut client = pool.get().await?;
    let tx = begin(&mut client).await?;
    for ddl in ensure_audit_stmts(&audit_gen) {
        execute(&tx, &ddl).await?;
    }
    let previous_docs = query_docs(&tx, &capture).await?;
    let removed = execute(&tx, &mutation).await?;
    for previous in previous_docs {
        let record = ctx.record(AuditEvent::Delete, Some(previous), None);
        execute(&tx, &audit_gen.insert(&record.to_doc())).await?;
    }
    tx.commit().await.map_err(StoreError::from_pg_error)?;
    Ok(removed)
}

pub(crate) async fn restore(
    pool: &Pool,
    opts: &StoreOptions,
    table: &str,
    q: &UriQuery,
    ctx: &AuditContext,
) -> StoreResult<RestoreReport> {
    let dialect = PostgresDialect;
    let table_gen = Generator::new(&dialect, &opts.schema, table)?;
    let audit_gen = Generator::new(&dialect, &opts.schema, &audit_table_name(table))?;
    let pk = q
        .primary_key
        .as_ref()
        .ok_or_else(|| StoreError::validation("restore requires a primary_key= clause"))?;
    let key_steps = primary_key_steps(pk)?;

    let mut client = pool.get().await?;
    let tx = begin(&mut client).await?;

    let probe = audit_gen.table_exists();
    if !has_rows(&tx, &probe).await? {
        return Err(StoreError::AuditMissing(format!(
            "table '{table}' has no audit journal"
        )));
    }
    execute(&tx, &audit_gen.create_index(&previous_key_steps(&key_steps), false)).await?;

    let audit_docs = query_docs(&tx, &audit_gen.select_documents(q)?).await?;
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
        let current =
            query_docs(&tx, &table_gen.select_by_key(&key_steps, &item.key_literal)?).await?;
        if current.len() > 1 {
            return Err(StoreError::Integrity(format!(
                "primary key {} matches {} rows",
                item.key,
                current.len()
            )));
        }
        match current.into_iter().next() {
            None => {
                execute(&tx, &table_gen.insert(&item.target)).await?;
                let record = ctx.record(AuditEvent::Create, None, None);
                execute(&tx, &audit_gen.insert(&record.to_doc())).await?;
                report.inserted.push(item.key);
            }
            Some(current) if current != item.target => {
                execute(
                    &tx,
                    &table_gen.overwrite_by_key(&key_steps, &item.key_literal, &item.target)?,
                )
                .await?;
                let record = ctx.record(AuditEvent::Update, Some(current), None);
                execute(&tx, &audit_gen.insert(&record.to_doc())).await?;
                report.updated.push(item.key);
            }
            Some(_) => {}
        }
    }
    tx.commit().await.map_err(StoreError::from_pg_error)?;
    Ok(report)
}
