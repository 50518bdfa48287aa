//! # docql
//!
//! A URI query language over JSON document tables, for SQLite and PostgreSQL.
//!
//! ## Features
//!
//! - **Schemaless documents**: each row is one JSON object in a single column
//! - **Compact queries**: `select=b,sum(a)&where=a=gt.0&group_by=b` compiles
//!   to parameterised SQL for either backend
//! - **Nested addressing**: `d.e`, `x[0]`, `x[*|a]` reach inside documents
//! - **Versioned mutations**: every update/delete journals the pre-image, an
//!   actor identity, and a reason; `restore&primary_key=...` replays them
//! - **Safe defaults**: DELETE requires WHERE, UPDATE requires SET

pub mod ast;
pub mod audit;
mod backend;
pub mod error;
pub mod eval;
mod parse;
pub mod path;
pub mod pool;
pub mod sql;
pub mod store;

pub use ast::UriQuery;
pub use audit::{AuditEvent, AuditRecord};
pub use backend::stream::DocStream;
pub use error::{StoreError, StoreResult};
pub use pool::{create_pool, create_pool_with_config};
pub use sql::{Dialect, Generator, PostgresDialect, SqliteDialect, Statement};
pub use store::{RestoreReport, Store, StoreOptions};
