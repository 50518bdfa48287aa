//! URI query parsing.
//!
//! The query string is a `&`-separated list of `key=value` clauses (plus the
//! bare `restore` flag). Splitting is quote-aware: `'…'` literals may contain
//! `&`, `,` and `=`, with `\'` as the escaped quote. Every error carries the
//! byte position where parsing stopped and what was expected there.

use crate::ast::{
    AggFunc, Direction, Filter, FilterOp, Literal, OrderBy, Range, SelectTerm, UriQuery, WhereExpr,
};
use crate::error::{StoreError, StoreResult};
use crate::path::{Path, PathPart, Selector};

/// Parse a full query string. Called through [`UriQuery::parse`], which also
/// runs structural validation.
pub(crate) fn query_from_str(query: &str) -> StoreResult<UriQuery> {
    let mut out = UriQuery::empty(query);
    if query.is_empty() {
        return Ok(out);
    }

    for (start, end) in split_top(query, 0, query.len(), '&') {
        if start == end {
            return Err(StoreError::parse(start, "clause"));
        }
        let eq = find_top(query, start, end, '=');
        let key = &query[start..eq.unwrap_or(end)];
        let value_start = eq.map(|i| i + 1);

        match key {
            "select" => {
                reject_duplicate(out.select.is_some(), start, "select")?;
                out.select = Some(parse_select(&mut payload(query, value_start, end, "select terms")?)?);
            }
            "where" => {
                reject_duplicate(out.filter.is_some(), start, "where")?;
                out.filter = Some(parse_where(&mut payload(query, value_start, end, "a filter expression")?)?);
            }
            "order" => {
                reject_duplicate(out.order.is_some(), start, "order")?;
                out.order = Some(parse_order(&mut payload(query, value_start, end, "path.asc or path.desc")?)?);
            }
            "range" => {
                reject_duplicate(out.range.is_some(), start, "range")?;
                out.range = Some(parse_range(&mut payload(query, value_start, end, "start.end")?)?);
            }
            "group_by" => {
                reject_duplicate(out.group_by.is_some(), start, "group_by")?;
                out.group_by = Some(parse_path_list(&mut payload(query, value_start, end, "paths")?)?);
            }
            "set" => {
                reject_duplicate(out.set.is_some(), start, "set")?;
                out.set = Some(parse_set(&mut payload(query, value_start, end, "keys")?)?);
            }
            "primary_key" => {
                reject_duplicate(out.primary_key.is_some(), start, "primary_key")?;
                let mut cur = payload(query, value_start, end, "a path")?;
                let path = parse_path(&mut cur)?;
                cur.expect_end("end of primary_key")?;
                out.primary_key = Some(path);
            }
            "message" => {
                reject_duplicate(out.message.is_some(), start, "message")?;
                let mut cur = payload(query, value_start, end, "a quoted string")?;
                out.message = Some(parse_message(&mut cur)?);
            }
            "restore" => {
                reject_duplicate(out.restore, start, "restore")?;
                if let Some(i) = eq {
                    return Err(StoreError::parse(i, "'&' or end of query"));
                }
                out.restore = true;
            }
            _ => {
                return Err(StoreError::parse(
                    start,
                    "one of select, where, order, range, group_by, set, \
                     primary_key, message, restore",
                ));
            }
        }
    }
    Ok(out)
}

/// Parse a standalone path string.
pub(crate) fn path_from_str(s: &str) -> StoreResult<Path> {
    let mut cur = Cursor::new(s, 0, s.len());
    let path = parse_path(&mut cur)?;
    cur.expect_end("end of path")?;
    Ok(path)
}

fn reject_duplicate(seen: bool, pos: usize, clause: &str) -> StoreResult<()> {
    if seen {
        return Err(StoreError::parse(pos, format!("at most one '{clause}' clause")));
    }
    Ok(())
}

/// Cursor over a clause's `value` region; a clause with no `=` reports what
/// the key needed at the end of the clause.
fn payload<'a>(
    query: &'a str,
    value_start: Option<usize>,
    end: usize,
    expected: &str,
) -> StoreResult<Cursor<'a>> {
    match value_start {
        Some(start) => Ok(Cursor::new(query, start, end)),
        None => Err(StoreError::parse(end, format!("'=' followed by {expected}"))),
    }
}

// ==================== clause payloads ====================

fn parse_select(cur: &mut Cursor<'_>) -> StoreResult<Vec<SelectTerm>> {
    let mut terms = Vec::new();
    for (start, end) in split_top(cur.src, cur.pos, cur.end, ',') {
        let mut item = Cursor::new(cur.src, start, end);
        terms.push(parse_select_term(&mut item)?);
        item.expect_end("',' or end of select clause")?;
    }
    Ok(terms)
}

fn parse_select_term(cur: &mut Cursor<'_>) -> StoreResult<SelectTerm> {
    let saved = cur.pos;
    let ident = cur.take_bare_ident();
    if !ident.is_empty() && cur.peek() == Some('(') {
        let func = AggFunc::from_name(ident)
            .ok_or_else(|| StoreError::parse(saved, "an aggregate function name"))?;
        cur.bump(); // '('
        let arg = if cur.eat('*') {
            if func != AggFunc::Count {
                return Err(StoreError::parse(saved, "'*' is only valid in count(*)"));
            }
            None
        } else {
            Some(parse_path(cur)?)
        };
        cur.expect(')', "')'")?;
        return Ok(SelectTerm::Agg { func, arg });
    }
    cur.pos = saved;
    Ok(SelectTerm::Path(parse_path(cur)?))
}

fn parse_where(cur: &mut Cursor<'_>) -> StoreResult<WhereExpr> {
    let items = split_top(cur.src, cur.pos, cur.end, ',');
    let mut expr: Option<WhereExpr> = None;
    for (i, (start, end)) in items.into_iter().enumerate() {
        let mut item = Cursor::new(cur.src, start, end);
        let conjunction = if i == 0 {
            None
        } else {
            let ident = item.take_bare_ident();
            let conj = match ident {
                "and" => true,
                "or" => false,
                _ => return Err(StoreError::parse(start, "'and:' or 'or:'")),
            };
            item.expect(':', "':'")?;
            Some(conj)
        };
        let leaf = WhereExpr::Leaf(parse_filter(&mut item)?);
        item.expect_end("',' or end of where clause")?;

        expr = Some(match (conjunction, expr) {
            (None, _) => leaf,
            (Some(true), Some(WhereExpr::And(mut items))) => {
                items.push(leaf);
                WhereExpr::And(items)
            }
            (Some(true), Some(prev)) => WhereExpr::And(vec![prev, leaf]),
            (Some(false), Some(WhereExpr::Or(mut items))) => {
                items.push(leaf);
                WhereExpr::Or(items)
            }
            (Some(false), Some(prev)) => WhereExpr::Or(vec![prev, leaf]),
            (Some(_), None) => unreachable!("conjunction only set after the first item, which always sets expr"),
        });
    }
    expr.ok_or_else(|| cur.err("a filter expression"))
}

fn parse_filter(cur: &mut Cursor<'_>) -> StoreResult<Filter> {
    let path = parse_path(cur)?;
    cur.expect('=', "'='")?;

    let mut not = false;
    let mut op_start = cur.pos;
    let mut op_name = cur.take_bare_ident();
    if op_name == "not" {
        not = true;
        cur.expect('.', "'.'")?;
        op_start = cur.pos;
        op_name = cur.take_bare_ident();
    }

    let op = match op_name {
        "is" => {
            cur.expect('.', "'.'")?;
            let word = cur.take_bareword();
            if word != "null" {
                return Err(StoreError::parse(cur.pos - word.len(), "null"));
            }
            FilterOp::IsNull
        }
        "in" => {
            cur.expect('.', "'.'")?;
            cur.expect('[', "'['")?;
            let mut items = vec![parse_literal(cur)?];
            while cur.eat(',') {
                items.push(parse_literal(cur)?);
            }
            cur.expect(']', "']'")?;
            FilterOp::In(items)
        }
        "like" | "ilike" => {
            let insensitive = op_name == "ilike";
            cur.expect('.', "'.'")?;
            let pattern = match parse_literal(cur)? {
                Literal::Text(s) => s,
                Literal::Number(n) => n.to_string(),
                _ => return Err(StoreError::parse(cur.pos, "a pattern")),
            };
            if insensitive {
                FilterOp::Ilike(pattern)
            } else {
                FilterOp::Like(pattern)
            }
        }
        "eq" | "gt" | "gte" | "lt" | "lte" | "neq" => {
            cur.expect('.', "'.'")?;
            let lit = parse_literal(cur)?;
            match op_name {
                "eq" => FilterOp::Eq(lit),
                "gt" => FilterOp::Gt(lit),
                "gte" => FilterOp::Gte(lit),
                "lt" => FilterOp::Lt(lit),
                "lte" => FilterOp::Lte(lit),
                _ => FilterOp::Neq(lit),
            }
        }
        _ => {
            return Err(StoreError::parse(
                op_start,
                "one of eq, gt, gte, lt, lte, neq, like, ilike, in, is",
            ));
        }
    };

    Ok(Filter { path, not, op })
}

fn parse_order(cur: &mut Cursor<'_>) -> StoreResult<OrderBy> {
    // The direction is the last top-level dotted component; everything
    // before it is the path (which may itself contain dots).
    let dot = rfind_top(cur.src, cur.pos, cur.end, '.')
        .ok_or_else(|| StoreError::parse(cur.end, "'.asc' or '.desc'"))?;
    let mut path_cur = Cursor::new(cur.src, cur.pos, dot);
    let path = parse_path(&mut path_cur)?;
    path_cur.expect_end("'.asc' or '.desc'")?;

    let direction = match &cur.src[dot + 1..cur.end] {
        "asc" => Direction::Asc,
        "desc" => Direction::Desc,
        _ => return Err(StoreError::parse(dot + 1, "asc or desc")),
    };
    Ok(OrderBy { path, direction })
}

fn parse_range(cur: &mut Cursor<'_>) -> StoreResult<Range> {
    let start = parse_uint(cur)?;
    cur.expect('.', "'.'")?;
    let end = parse_uint(cur)?;
    cur.expect_end("end of range clause")?;
    Ok(Range { start, end })
}

fn parse_path_list(cur: &mut Cursor<'_>) -> StoreResult<Vec<Path>> {
    let mut paths = Vec::new();
    for (start, end) in split_top(cur.src, cur.pos, cur.end, ',') {
        let mut item = Cursor::new(cur.src, start, end);
        paths.push(parse_path(&mut item)?);
        item.expect_end("',' or end of clause")?;
    }
    Ok(paths)
}

fn parse_set(cur: &mut Cursor<'_>) -> StoreResult<Vec<String>> {
    let mut keys = Vec::new();
    for (start, end) in split_top(cur.src, cur.pos, cur.end, ',') {
        let mut item = Cursor::new(cur.src, start, end);
        keys.push(parse_key(&mut item)?);
        item.expect_end("',' or end of set clause")?;
    }
    Ok(keys)
}

fn parse_message(cur: &mut Cursor<'_>) -> StoreResult<String> {
    let message = match parse_literal(cur)? {
        Literal::Text(s) => s,
        _ => return Err(cur.err("a quoted string")),
    };
    cur.expect_end("end of message clause")?;
    Ok(message)
}

// ==================== paths ====================

fn parse_path(cur: &mut Cursor<'_>) -> StoreResult<Path> {
    let mut parts = vec![parse_path_part(cur)?];
    while cur.eat('.') {
        parts.push(parse_path_part(cur)?);
    }
    Ok(Path { parts })
}

fn parse_path_part(cur: &mut Cursor<'_>) -> StoreResult<PathPart> {
    let key = parse_key(cur)?;
    let selector = if cur.eat('[') {
        Some(parse_selector(cur)?)
    } else {
        None
    };
    Ok(PathPart { key, selector })
}

fn parse_key(cur: &mut Cursor<'_>) -> StoreResult<String> {
    let key = if cur.peek() == Some('\'') {
        parse_quoted(cur)?
    } else {
        let ident = cur.take_bare_ident();
        if ident.is_empty() {
            return Err(cur.err("a path component"));
        }
        ident.to_string()
    };
    if key.contains('"') || key.chars().any(char::is_control) {
        return Err(StoreError::validation(format!(
            "key {key:?} contains characters that cannot be addressed"
        )));
    }
    Ok(key)
}

fn parse_selector(cur: &mut Cursor<'_>) -> StoreResult<Selector> {
    let wildcard = cur.eat('*');
    let index = if wildcard { 0 } else { parse_uint(cur)? };
    let sub = if cur.eat('|') {
        Some(Box::new(parse_path(cur)?))
    } else {
        None
    };
    cur.expect(']', "']'")?;
    Ok(match (wildcard, sub) {
        (true, Some(sub)) => Selector::AllSub(sub),
        (true, None) => Selector::All,
        (false, Some(sub)) => Selector::IndexSub(index, sub),
        (false, None) => Selector::Index(index),
    })
}

fn parse_uint(cur: &mut Cursor<'_>) -> StoreResult<u64> {
    let start = cur.pos;
    while cur.peek().is_some_and(|c| c.is_ascii_digit()) {
        cur.bump();
    }
    cur.src[start..cur.pos]
        .parse()
        .map_err(|_| StoreError::parse(start, "an unsigned integer"))
}

// ==================== literals ====================

fn parse_literal(cur: &mut Cursor<'_>) -> StoreResult<Literal> {
    if cur.peek() == Some('\'') {
        return Ok(Literal::Text(parse_quoted(cur)?));
    }
    let word = cur.take_bareword();
    if word.is_empty() {
        return Err(cur.err("a literal"));
    }
    Ok(match word {
        "null" => Literal::Null,
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        _ => match word.parse::<f64>() {
            Ok(n) => Literal::Number(n),
            Err(_) => Literal::Text(word.to_string()),
        },
    })
}

fn parse_quoted(cur: &mut Cursor<'_>) -> StoreResult<String> {
    cur.expect('\'', "'''")?;
    let mut out = String::new();
    loop {
        match cur.bump() {
            Some('\\') => match cur.bump() {
                Some('\'') => out.push('\''),
                Some('\\') => out.push('\\'),
                Some(c) => {
                    out.push('\\');
                    out.push(c);
                }
                None => return Err(cur.err("a closing quote")),
            },
            Some('\'') => return Ok(out),
            Some(c) => out.push(c),
            None => return Err(cur.err("a closing quote")),
        }
    }
}

// ==================== scanning ====================

/// A byte-position cursor over one region of the query string. Positions in
/// errors are always absolute offsets into the full query.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str, pos: usize, end: usize) -> Self {
        Self { src, pos, end }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.end]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char, expected: &str) -> StoreResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(expected))
        }
    }

    fn expect_end(&self, expected: &str) -> StoreResult<()> {
        if self.pos >= self.end {
            Ok(())
        } else {
            Err(self.err(expected))
        }
    }

    fn err(&self, expected: impl Into<String>) -> StoreError {
        StoreError::parse(self.pos, expected)
    }

    /// Consume `[A-Za-z_][A-Za-z0-9_]*`, returning `""` when absent.
    fn take_bare_ident(&mut self) -> &'a str {
        let start = self.pos;
        if self
            .peek()
            .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        {
            self.bump();
            while self
                .peek()
                .is_some_and(|c| c == '_' || c.is_ascii_alphanumeric())
            {
                self.bump();
            }
        }
        &self.src[start..self.pos]
    }

    /// Consume up to the next literal delimiter (`,`, `&`, `]`) or region end.
    fn take_bareword(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c != ',' && c != '&' && c != ']')
        {
            self.bump();
        }
        &self.src[start..self.pos]
    }
}

/// Split `src[start..end]` at top-level occurrences of `sep`: outside quoted
/// strings and outside `[…]` selectors.
fn split_top(src: &str, start: usize, end: usize, sep: char) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut item_start = start;
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in src[start..end].char_indices() {
        let i = start + i;
        if in_quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => in_quote = true,
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if c == sep && depth == 0 => {
                out.push((item_start, i));
                item_start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push((item_start, end));
    out
}

/// First top-level occurrence of `sep` in `src[start..end]`.
fn find_top(src: &str, start: usize, end: usize, sep: char) -> Option<usize> {
    let first = split_top(src, start, end, sep)[0].1;
    (first < end).then_some(first)
}

/// Last top-level occurrence of `sep` in `src[start..end]`.
fn rfind_top(src: &str, start: usize, end: usize, sep: char) -> Option<usize> {
    let pieces = split_top(src, start, end, sep);
    (pieces.len() > 1).then(|| pieces[pieces.len() - 1].0 - sep.len_utf8())
}
