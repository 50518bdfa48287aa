//! The SQL compiler: a validated AST plus a dialect in, a parameterised
//! statement out.

use serde_json::{Map, Value};

use crate::ast::{AggFunc, Direction, Filter, FilterOp, Literal, SelectTerm, UriQuery, WhereExpr};
use crate::error::{StoreError, StoreResult};
use crate::path::{Path, PathShape, Step};
use crate::sql::dialect::Dialect;
use crate::sql::{RowShape, SqlParam, Statement};

/// Validate an identifier (schema or table name) against the allow-list
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_ident(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic());
    if head_ok && chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "identifier '{name}' is not allowed"
        )))
    }
}

/// Compiles statements for one (dialect, schema, table) triple.
pub struct Generator<'a> {
    dialect: &'a dyn Dialect,
    schema: String,
    table: String,
}

impl<'a> Generator<'a> {
    pub fn new(dialect: &'a dyn Dialect, schema: &str, table: &str) -> StoreResult<Self> {
        validate_ident(schema)?;
        validate_ident(table)?;
        Ok(Self {
            dialect,
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    fn table_ref(&self) -> String {
        self.dialect.table_ref(&self.schema, &self.table)
    }

    // ==================== SELECT ====================

    /// Compile a SELECT with projection, filter, grouping, ordering, range.
    pub fn select(&self, q: &UriQuery) -> StoreResult<(Statement, RowShape)> {
        let mut params = Vec::new();
        let (columns, shape) = match &q.select {
            None => ("data".to_string(), RowShape::Document),
            Some(terms) => {
                let cols = terms
                    .iter()
                    .map(|t| self.term_expr(t))
                    .collect::<StoreResult<Vec<_>>>()?;
                (cols.join(", "), RowShape::Tuple(terms.len()))
            }
        };

        let mut sql = format!("SELECT {columns} FROM {}", self.table_ref());
        if let Some(filter) = &q.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_expr(filter, &mut params)?);
        }

        let group_exprs = q
            .group_by
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|p| {
                Ok(self
                    .dialect
                    .extract_scalar("data", &self.simple_steps(p, "group_by")?))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        if !group_exprs.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_exprs.join(", "));
        }

        if let Some(order) = &q.order {
            let steps = self.simple_steps(&order.path, "order")?;
            let ascending = order.direction == Direction::Asc;
            sql.push_str(&format!(
                " ORDER BY {} {}{}",
                self.dialect.extract_scalar("data", &steps),
                if ascending { "ASC" } else { "DESC" },
                self.dialect.order_nulls(ascending)
            ));
        } else if !group_exprs.is_empty() {
            // Stable group order: ascending, nulls first on both backends.
            let order_cols: Vec<String> = group_exprs
                .iter()
                .map(|e| format!("{e} ASC{}", self.dialect.order_nulls(true)))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_cols.join(", "));
        }

        if let Some(range) = &q.range {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", range.limit(), range.start));
        }

        Ok((Statement { sql, params }, shape))
    }

    /// Compile the pre-mutation capture: whole documents under the query's
    /// filter, ignoring projection and pagination.
    pub fn select_documents(&self, q: &UriQuery) -> StoreResult<Statement> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT data FROM {}", self.table_ref());
        if let Some(filter) = &q.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_expr(filter, &mut params)?);
        }
        Ok(Statement { sql, params })
    }

    fn term_expr(&self, term: &SelectTerm) -> StoreResult<String> {
        let d = self.dialect;
        match term {
            SelectTerm::Path(path) => match path.shape()? {
                PathShape::Simple(steps) => Ok(d.wrap_column(&d.extract_scalar("data", &steps))),
                // Array subqueries already yield JSON; wrapping them again
                // would re-quote the serialised text.
                PathShape::Wild { outer, inner } => Ok(d.iterate_array("data", &outer, &inner)),
            },
            SelectTerm::Agg { func, arg } => {
                let inner = match (func, arg) {
                    (AggFunc::Count, None) => "count(*)".to_string(),
                    (AggFunc::Count, Some(path)) => {
                        let steps = self.simple_steps(path, "count")?;
                        format!("count({})", d.extract_text("data", &steps))
                    }
                    (AggFunc::MinTs | AggFunc::MaxTs, Some(path)) => {
                        let steps = self.simple_steps(path, "aggregate")?;
                        let func_name = if *func == AggFunc::MinTs { "min" } else { "max" };
                        format!(
                            "{func_name}({})",
                            d.cast_timestamp(&d.extract_text("data", &steps))
                        )
                    }
                    (agg, Some(path)) => {
                        let steps = self.simple_steps(path, "aggregate")?;
                        let func_name = match agg {
                            AggFunc::Avg => "avg",
                            AggFunc::Sum => "sum",
                            AggFunc::Min => "min",
                            AggFunc::Max => "max",
                            _ => unreachable!("count and *_ts handled above"),
                        };
                        format!("{func_name}({})", d.extract_number("data", &steps))
                    }
                    (_, None) => {
                        return Err(StoreError::validation(
                            "aggregate functions other than count(*) need a path argument",
                        ));
                    }
                };
                Ok(d.wrap_aggregate(&inner))
            }
        }
    }

    // ==================== WHERE ====================

    fn where_expr(&self, expr: &WhereExpr, params: &mut Vec<SqlParam>) -> StoreResult<String> {
        match expr {
            WhereExpr::Leaf(filter) => self.leaf(filter, params),
            WhereExpr::And(items) => self.combine(items, " AND ", params),
            WhereExpr::Or(items) => self.combine(items, " OR ", params),
        }
    }

    fn combine(
        &self,
        items: &[WhereExpr],
        joiner: &str,
        params: &mut Vec<SqlParam>,
    ) -> StoreResult<String> {
        let parts = items
            .iter()
            .map(|item| self.where_expr(item, params))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }

    fn leaf(&self, filter: &Filter, params: &mut Vec<SqlParam>) -> StoreResult<String> {
        let steps = self.simple_steps(&filter.path, "where")?;
        let d = self.dialect;

        if let FilterOp::IsNull = filter.op {
            let maybe_not = if filter.not { "NOT " } else { "" };
            return Ok(format!(
                "{} IS {maybe_not}NULL",
                d.extract_text("data", &steps)
            ));
        }

        let core = match &filter.op {
            FilterOp::Eq(lit) => self.comparison(&steps, "=", lit, params)?,
            FilterOp::Gt(lit) => self.comparison(&steps, ">", lit, params)?,
            FilterOp::Gte(lit) => self.comparison(&steps, ">=", lit, params)?,
            FilterOp::Lt(lit) => self.comparison(&steps, "<", lit, params)?,
            FilterOp::Lte(lit) => self.comparison(&steps, "<=", lit, params)?,
            FilterOp::Neq(lit) => self.comparison(&steps, "!=", lit, params)?,
            FilterOp::Like(pattern) => {
                d.like_predicate(&d.extract_text("data", &steps), pattern, false, params)
            }
            FilterOp::Ilike(pattern) => {
                d.like_predicate(&d.extract_text("data", &steps), pattern, true, params)
            }
            FilterOp::In(list) => {
                if list.iter().all(|l| matches!(l, Literal::Number(_))) {
                    let expr = d.extract_number("data", &steps);
                    let placeholders = list
                        .iter()
                        .map(|lit| {
                            let Literal::Number(n) = lit else {
                                unreachable!("all-numeric list checked above");
                            };
                            params.push(SqlParam::Float(*n));
                            d.placeholder(params.len())
                        })
                        .collect::<Vec<_>>();
                    format!("{expr} IN ({})", placeholders.join(", "))
                } else {
                    // A single extraction cannot compare numbers, text, and
                    // booleans at once; non-numeric lists expand per element,
                    // each literal under its own typed comparison.
                    let comparisons = list
                        .iter()
                        .map(|lit| self.comparison(&steps, "=", lit, params))
                        .collect::<StoreResult<Vec<_>>>()?;
                    format!("({})", comparisons.join(" OR "))
                }
            }
            FilterOp::IsNull => unreachable!("handled above"),
        };

        if filter.not {
            Ok(format!("NOT ({core})"))
        } else {
            Ok(core)
        }
    }

    fn comparison(
        &self,
        steps: &[Step],
        op_sql: &str,
        lit: &Literal,
        params: &mut Vec<SqlParam>,
    ) -> StoreResult<String> {
        let d = self.dialect;
        let (expr, param) = match lit {
            Literal::Number(n) => (d.extract_number("data", steps), SqlParam::Float(*n)),
            Literal::Text(s) => (d.extract_text("data", steps), SqlParam::Text(s.clone())),
            Literal::Bool(b) => (d.extract_bool("data", steps), SqlParam::Bool(*b)),
            Literal::Null => {
                return Err(StoreError::validation(
                    "comparing against null; use is.null / not.is.null",
                ));
            }
        };
        params.push(param);
        Ok(format!("{expr} {op_sql} {}", d.placeholder(params.len())))
    }

    fn simple_steps(&self, path: &Path, context: &str) -> StoreResult<Vec<Step>> {
        match path.shape()? {
            PathShape::Simple(steps) => Ok(steps),
            PathShape::Wild { .. } => Err(StoreError::validation(format!(
                "wildcard path '{path}' is not allowed in {context}"
            ))),
        }
    }

    // ==================== mutations ====================

    /// Compile the UPDATE merging `set_keys` out of `patch`.
    pub fn update(
        &self,
        q: &UriQuery,
        set_keys: &[String],
        patch: &Map<String, Value>,
    ) -> StoreResult<Statement> {
        let mut params = Vec::new();
        let assignment = self.dialect.merge_patch("data", set_keys, patch, &mut params);
        let mut sql = format!("UPDATE {} SET {assignment}", self.table_ref());
        if let Some(filter) = &q.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_expr(filter, &mut params)?);
        }
        Ok(Statement { sql, params })
    }

    /// Compile the DELETE. Refuses a missing filter unless the caller
    /// explicitly confirmed a mass delete.
    pub fn delete(&self, q: &UriQuery, confirm_mass_delete: bool) -> StoreResult<Statement> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.table_ref());
        match &q.filter {
            Some(filter) => {
                sql.push_str(" WHERE ");
                sql.push_str(&self.where_expr(filter, &mut params)?);
            }
            None if confirm_mass_delete => {}
            None => {
                return Err(StoreError::validation(
                    "delete without a where clause; use table_delete_all to delete every row",
                ));
            }
        }
        Ok(Statement { sql, params })
    }

    /// Compile an INSERT of one document.
    pub fn insert(&self, doc: &Value) -> Statement {
        let mut params = Vec::new();
        let value = self.dialect.json_value(doc, &mut params);
        Statement {
            sql: format!("INSERT INTO {} (data) VALUES ({value})", self.table_ref()),
            params,
        }
    }

    /// SELECT whole documents whose value at `steps` equals `key`.
    pub fn select_by_key(&self, steps: &[Step], key: &Literal) -> StoreResult<Statement> {
        let mut params = Vec::new();
        let predicate = self.comparison(steps, "=", key, &mut params)?;
        Ok(Statement {
            sql: format!("SELECT data FROM {} WHERE {predicate}", self.table_ref()),
            params,
        })
    }

    /// UPDATE replacing the whole document where the value at `steps`
    /// equals `key`.
    pub fn overwrite_by_key(
        &self,
        steps: &[Step],
        key: &Literal,
        doc: &Value,
    ) -> StoreResult<Statement> {
        let mut params = Vec::new();
        let value = self.dialect.json_value(doc, &mut params);
        let predicate = self.comparison(steps, "=", key, &mut params)?;
        Ok(Statement {
            sql: format!(
                "UPDATE {} SET data = {value} WHERE {predicate}",
                self.table_ref()
            ),
            params,
        })
    }

    // ==================== DDL ====================

    /// Statements creating the table (and, on the server, its schema).
    pub fn create_table(&self) -> Vec<Statement> {
        self.dialect
            .create_table_sql(&self.schema, &self.table)
            .into_iter()
            .map(Statement::bare)
            .collect()
    }

    /// An expression index over a JSON path; unique indexes enforce the
    /// per-call primary key.
    pub fn create_index(&self, steps: &[Step], unique: bool) -> Statement {
        let mut name = format!("{}_{}", self.schema, self.table);
        for step in steps {
            name.push('_');
            match step {
                Step::Key(k) => name.extend(
                    k.chars()
                        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
                ),
                Step::Index(i) => name.push_str(&i.to_string()),
            }
        }
        name.push_str(if unique { "_uq" } else { "_idx" });
        Statement::bare(self.dialect.create_index_sql(
            &self.schema,
            &self.table,
            &name,
            steps,
            unique,
        ))
    }

    /// Probe for table existence.
    pub fn table_exists(&self) -> Statement {
        let (sql, params) = self.dialect.table_exists_sql(&self.schema, &self.table);
        Statement { sql, params }
    }
}
