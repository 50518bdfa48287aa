//! Typed representation of a parsed URI query.
//!
//! A query string like
//! `select=b,sum(a)&where=a=gt.0,and:b=not.is.null&group_by=b&range=0.9`
//! parses into one [`UriQuery`]. The tree is immutable once produced; the
//! SQL compiler consumes it read-only.

use crate::error::{StoreError, StoreResult};
use crate::path::Path;

/// A parsed URI query: one field per recognised clause.
#[derive(Debug, Clone, PartialEq)]
pub struct UriQuery {
    /// `select=` projection terms
    pub select: Option<Vec<SelectTerm>>,
    /// `where=` boolean filter
    pub filter: Option<WhereExpr>,
    /// `order=` ordering
    pub order: Option<OrderBy>,
    /// `range=` pagination window
    pub range: Option<Range>,
    /// `group_by=` grouping paths
    pub group_by: Option<Vec<Path>>,
    /// `set=` mutation target keys
    pub set: Option<Vec<String>>,
    /// `primary_key=` uniqueness / restore key
    pub primary_key: Option<Path>,
    /// `message=` audit reason
    pub message: Option<String>,
    /// bare `restore` flag
    pub restore: bool,
    /// the original query string, recorded verbatim in audit rows
    pub raw: String,
}

impl UriQuery {
    /// Parse and validate a URI query string.
    pub fn parse(query: &str) -> StoreResult<Self> {
        let parsed = crate::parse::query_from_str(query)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub(crate) fn empty(raw: &str) -> Self {
        Self {
            select: None,
            filter: None,
            order: None,
            range: None,
            group_by: None,
            set: None,
            primary_key: None,
            message: None,
            restore: false,
            raw: raw.to_string(),
        }
    }

    /// Structural validation that does not depend on the target operation.
    fn validate(&self) -> StoreResult<()> {
        if let Some(range) = &self.range {
            if range.end < range.start {
                return Err(StoreError::validation(format!(
                    "range {}.{} is inverted",
                    range.start, range.end
                )));
            }
        }

        if let Some(terms) = &self.select {
            let aggregates = terms.iter().any(|t| matches!(t, SelectTerm::Agg { .. }));
            let plain: Vec<&Path> = terms
                .iter()
                .filter_map(|t| match t {
                    SelectTerm::Path(p) => Some(p),
                    SelectTerm::Agg { .. } => None,
                })
                .collect();
            if aggregates && !plain.is_empty() {
                let group = self.group_by.as_deref().unwrap_or(&[]);
                for path in plain {
                    if !group.contains(path) {
                        return Err(StoreError::validation(format!(
                            "select mixes aggregates with '{path}', which is not in group_by"
                        )));
                    }
                }
            }
        }

        if self.group_by.is_some() && self.select.is_none() {
            return Err(StoreError::validation(
                "group_by requires a select clause",
            ));
        }
        for path in self.group_by.as_deref().unwrap_or(&[]) {
            if path.has_wildcard() {
                return Err(StoreError::validation(format!(
                    "group_by path '{path}' may not contain a wildcard"
                )));
            }
        }
        if let Some(order) = &self.order {
            if order.path.has_wildcard() {
                return Err(StoreError::validation(format!(
                    "order path '{}' may not contain a wildcard",
                    order.path
                )));
            }
        }
        if let Some(pk) = &self.primary_key {
            if pk.has_wildcard() {
                return Err(StoreError::validation(format!(
                    "primary_key path '{pk}' may not contain a wildcard"
                )));
            }
        }

        // Wildcard and selector-count checks live in Path::shape; run them
        // here so compilation never sees an unshapeable path.
        for path in self.paths() {
            path.shape()?;
        }
        Ok(())
    }

    /// All paths mentioned anywhere in the query.
    fn paths(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        for term in self.select.as_deref().unwrap_or(&[]) {
            match term {
                SelectTerm::Path(p) => out.push(p),
                SelectTerm::Agg { arg: Some(p), .. } => out.push(p),
                SelectTerm::Agg { arg: None, .. } => {}
            }
        }
        if let Some(expr) = &self.filter {
            expr.collect_paths(&mut out);
        }
        if let Some(order) = &self.order {
            out.push(&order.path);
        }
        out.extend(self.group_by.as_deref().unwrap_or(&[]));
        out.extend(self.primary_key.as_ref());
        out
    }
}

/// One projection term.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectTerm {
    /// A plain path extraction
    Path(Path),
    /// An aggregate call; `arg` is `None` only for `count(*)`
    Agg { func: AggFunc, arg: Option<Path> },
}

/// Aggregate functions accepted inside `select=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    /// `min_ts` — minimum after ISO-8601 timestamp coercion
    MinTs,
    /// `max_ts` — maximum after ISO-8601 timestamp coercion
    MaxTs,
}

impl AggFunc {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "count" => Self::Count,
            "avg" => Self::Avg,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "min_ts" => Self::MinTs,
            "max_ts" => Self::MaxTs,
            _ => return None,
        })
    }
}

/// The boolean filter tree. Combinator prefixes are normalised at parse
/// time into left-folded n-ary nodes: `a,and:b,or:c` becomes
/// `Or([And([a, b]), c])`.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereExpr {
    Leaf(Filter),
    And(Vec<WhereExpr>),
    Or(Vec<WhereExpr>),
}

impl WhereExpr {
    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            WhereExpr::Leaf(f) => out.push(&f.path),
            WhereExpr::And(items) | WhereExpr::Or(items) => {
                for item in items {
                    item.collect_paths(out);
                }
            }
        }
    }
}

/// One `path=op.literal` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub path: Path,
    /// `not.` prefix present
    pub not: bool,
    pub op: FilterOp,
}

/// Comparison operators accepted inside `where=`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Literal),
    Gt(Literal),
    Gte(Literal),
    Lt(Literal),
    Lte(Literal),
    Neq(Literal),
    /// Glob match with `*` as the wildcard, case-sensitive
    Like(String),
    /// Glob match, case-insensitive
    Ilike(String),
    In(Vec<Literal>),
    /// `is.null`
    IsNull,
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// `order=path.asc` / `order=path.desc`
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: Path,
    pub direction: Direction,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// `range=start.end`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    /// Number of rows the window admits.
    pub fn limit(&self) -> u64 {
        self.end - self.start + 1
    }
}
