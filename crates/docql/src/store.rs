//! The backend driver: the public, per-call-transactional API.

use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::ast::UriQuery;
use crate::audit::AuditContext;
use crate::backend::stream::DocStream;
use crate::backend::{Backend, postgres, sqlite};
use crate::error::{StoreError, StoreResult};

/// Driver configuration: which tenant schema to address and which actor
/// identity to stamp into audit rows.
///
/// # Example
/// ```ignore
/// let opts = StoreOptions::new("p11-svc")
///     .schema("p11")
///     .requestor_name("Project 11 service")
///     .audit_create(true);
/// ```
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Tenant schema the tables live in.
    pub schema: String,
    /// Opaque actor identifier recorded in every audit row.
    pub requestor: String,
    /// Human-readable actor name, if any.
    pub requestor_name: Option<String>,
    /// Journal `create` events on insert.
    pub audit_create: bool,
    /// Journal `read` events on select.
    pub audit_read: bool,
}

impl StoreOptions {
    pub fn new(requestor: impl Into<String>) -> Self {
        Self {
            schema: "docs".to_string(),
            requestor: requestor.into(),
            requestor_name: None,
            audit_create: false,
            audit_read: false,
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn requestor_name(mut self, name: impl Into<String>) -> Self {
        self.requestor_name = Some(name.into());
        self
    }

    pub fn audit_create(mut self, enabled: bool) -> Self {
        self.audit_create = enabled;
        self
    }

    pub fn audit_read(mut self, enabled: bool) -> Self {
        self.audit_read = enabled;
        self
    }
}

/// What a restore call put back, by primary key.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Keys re-inserted because the document had been deleted.
    pub inserted: Vec<Value>,
    /// Keys whose current document was overwritten with the pre-image.
    pub updated: Vec<Value>,
}

impl RestoreReport {
    /// True when every matched document already had its pre-image value.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }
}

/// A versioned document store over one backend.
///
/// Each `table_*` call parses its URI query, compiles it for the backend's
/// dialect, and runs inside a single transaction; mutations journal one
/// audit row per affected document.
///
/// # Example
/// ```ignore
/// use docql::{Store, StoreOptions};
/// use serde_json::json;
///
/// # async fn demo() -> docql::StoreResult<()> {
/// let store = Store::sqlite_in_memory(StoreOptions::new("svc"))?;
/// store.table_insert("things", json!({"id": 1, "saying": "good"}), "").await?;
/// store
///     .table_update("things", "set=saying&where=id=eq.1&message='fix'",
///                   json!({"saying": "excellent"}))
///     .await?;
/// store.table_restore("things", "restore&primary_key=id").await?;
/// # Ok(()) }
/// ```
pub struct Store {
    backend: Backend,
    options: StoreOptions,
}

impl Store {
    /// Open (or create) an embedded single-file store.
    pub fn sqlite(path: impl AsRef<FsPath>, options: StoreOptions) -> StoreResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(Self {
            backend: Backend::Sqlite(Arc::new(Mutex::new(conn))),
            options,
        })
    }

    /// An in-memory embedded store, mainly for tests.
    pub fn sqlite_in_memory(options: StoreOptions) -> StoreResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self {
            backend: Backend::Sqlite(Arc::new(Mutex::new(conn))),
            options,
        })
    }

    /// A server-backed store on an existing connection pool.
    pub fn postgres(pool: deadpool_postgres::Pool, options: StoreOptions) -> Self {
        Self {
            backend: Backend::Postgres(pool),
            options,
        }
    }

    fn audit_ctx(&self, q: &UriQuery) -> AuditContext {
        AuditContext {
            identity: self.options.requestor.clone(),
            identity_name: self.options.requestor_name.clone(),
            reason: q.message.clone(),
            transaction_id: Uuid::new_v4(),
            query: q.raw.clone(),
        }
    }

    /// Insert one document or a batch.
    ///
    /// `data` is a single JSON object or an array of objects; a batch runs
    /// in one transaction and rolls back as a whole. The document and audit
    /// tables are created on first use. A `primary_key=` clause in
    /// `uri_query` installs a unique index on that path; violations surface
    /// as [`StoreError::Integrity`].
    pub async fn table_insert(
        &self,
        table: &str,
        data: Value,
        uri_query: &str,
    ) -> StoreResult<u64> {
        let q = UriQuery::parse(uri_query)?;
        let docs = match data {
            Value::Array(items) => items,
            doc @ Value::Object(_) => vec![doc],
            _ => {
                return Err(StoreError::validation(
                    "insert data must be an object or an array of objects",
                ));
            }
        };
        for doc in &docs {
            if !doc.is_object() {
                return Err(StoreError::validation(
                    "every inserted document must be a JSON object",
                ));
            }
        }
        if docs.is_empty() {
            return Ok(0);
        }
        let ctx = self.audit_ctx(&q);
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = Arc::clone(conn);
                let opts = self.options.clone();
                let table = table.to_string();
                run_blocking(move || sqlite::insert(&conn, &opts, &table, &docs, &q, &ctx)).await
            }
            Backend::Postgres(pool) => {
                postgres::insert(pool, &self.options, table, &docs, &q, &ctx).await
            }
        }
    }

    /// Run a query and stream its rows.
    ///
    /// Rows are whole documents, or JSON arrays when the query projects.
    /// The stream holds the connection until it is consumed or dropped.
    pub async fn table_select(&self, table: &str, uri_query: &str) -> StoreResult<DocStream> {
        let q = UriQuery::parse(uri_query)?;
        let read_ctx = self.options.audit_read.then(|| self.audit_ctx(&q));
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = Arc::clone(conn);
                let opts = self.options.clone();
                let table = table.to_string();
                let rows =
                    run_blocking(move || sqlite::select(&conn, &opts, &table, &q, read_ctx.as_ref()))
                        .await?;
                Ok(DocStream::from_rows(rows))
            }
            Backend::Postgres(pool) => {
                postgres::select(pool, &self.options, table, &q, read_ctx.as_ref()).await
            }
        }
    }

    /// Apply `patch` to every matching document, merging only the keys the
    /// query's `set=` clause lists. Returns the number of documents changed
    /// and journals one `update` audit row per document, carrying the full
    /// pre-image and the applied diff.
    pub async fn table_update(
        &self,
        table: &str,
        uri_query: &str,
        patch: Value,
    ) -> StoreResult<u64> {
        let q = UriQuery::parse(uri_query)?;
        let set_keys = q
            .set
            .clone()
            .ok_or_else(|| StoreError::validation("update requires a set= clause"))?;
        let patch = patch
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::validation("update patch must be a JSON object"))?;
        for key in &set_keys {
            if !patch.contains_key(key) {
                return Err(StoreError::validation(format!(
                    "patch is missing set key '{key}'"
                )));
            }
        }
        let ctx = self.audit_ctx(&q);
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = Arc::clone(conn);
                let opts = self.options.clone();
                let table = table.to_string();
                run_blocking(move || {
                    sqlite::update(&conn, &opts, &table, &q, &set_keys, &patch, &ctx)
                })
                .await
            }
            Backend::Postgres(pool) => {
                postgres::update(pool, &self.options, table, &q, &set_keys, &patch, &ctx).await
            }
        }
    }

    /// Delete matching documents. A query without a `where=` clause is
    /// refused; use [`Store::table_delete_all`] for a confirmed mass delete.
    /// One `delete` audit row per removed document carries the pre-image.
    pub async fn table_delete(&self, table: &str, uri_query: &str) -> StoreResult<u64> {
        self.delete_inner(table, uri_query, false).await
    }

    /// Delete with explicit mass-delete confirmation: an absent `where=`
    /// clause removes every document in the table.
    pub async fn table_delete_all(&self, table: &str, uri_query: &str) -> StoreResult<u64> {
        self.delete_inner(table, uri_query, true).await
    }

    async fn delete_inner(
        &self,
        table: &str,
        uri_query: &str,
        confirm_mass_delete: bool,
    ) -> StoreResult<u64> {
        let q = UriQuery::parse(uri_query)?;
        let ctx = self.audit_ctx(&q);
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = Arc::clone(conn);
                let opts = self.options.clone();
                let table = table.to_string();
                run_blocking(move || {
                    sqlite::delete(&conn, &opts, &table, &q, confirm_mass_delete, &ctx)
                })
                .await
            }
            Backend::Postgres(pool) => {
                postgres::delete(pool, &self.options, table, &q, confirm_mass_delete, &ctx).await
            }
        }
    }

    /// Reverse journalled mutations.
    ///
    /// Requires `primary_key=`; an optional `where=` clause narrows the
    /// candidate audit rows (it addresses audit fields such as `timestamp`,
    /// `identity`, or `previous.<key>`). For each key the newest pre-image
    /// wins; deleted documents are re-inserted and changed documents are
    /// overwritten. The restore itself is journalled, so it can be undone
    /// the same way.
    pub async fn table_restore(
        &self,
        table: &str,
        uri_query: &str,
    ) -> StoreResult<RestoreReport> {
        let q = UriQuery::parse(uri_query)?;
        let ctx = self.audit_ctx(&q);
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = Arc::clone(conn);
                let opts = self.options.clone();
                let table = table.to_string();
                run_blocking(move || sqlite::restore(&conn, &opts, &table, &q, &ctx)).await
            }
            Backend::Postgres(pool) => {
                postgres::restore(pool, &self.options, table, &q, &ctx).await
            }
        }
    }
}

async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::backend(format!("blocking task failed: {e}")))?
}
