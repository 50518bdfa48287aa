//! Nested document addresses.
//!
//! A [`Path`] names a location inside a JSON document: a dotted sequence of
//! keys, where each component may carry one selector addressing into an
//! array (`x[0]`, `x[*]`, `x[0|a.b]`, `x[*|a.b]`). Keys with characters
//! outside `[A-Za-z_][A-Za-z0-9_]*` are written single-quoted.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// An addressable location inside a document, possibly with one wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub parts: Vec<PathPart>,
}

/// One dotted component: an object key plus an optional array selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPart {
    pub key: String,
    pub selector: Option<Selector>,
}

/// Array selector attached to a path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `[N]` — one element
    Index(u64),
    /// `[*]` — every element
    All,
    /// `[N|sub]` — a subpath inside element N
    IndexSub(u64, Box<Path>),
    /// `[*|sub]` — a subpath inside every element, yielding an array
    AllSub(Box<Path>),
}

/// A flattened path step, after selectors are unrolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(u64),
}

/// The compilation shape of a path: plain extraction, or array iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathShape {
    /// No wildcard: a single chain of steps.
    Simple(Vec<Step>),
    /// One `[*]` / `[*|sub]`: steps down to the array, then steps inside
    /// each element (empty for a bare `[*]`).
    Wild { outer: Vec<Step>, inner: Vec<Step> },
}

impl Path {
    /// Parse a path from its URI form, e.g. `a.b`, `x[0|h.e]`, `'odd key'.k`.
    pub fn parse(s: &str) -> StoreResult<Self> {
        crate::parse::path_from_str(s)
    }

    /// Number of wildcard selectors anywhere in the path.
    pub fn wildcard_count(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match &p.selector {
                Some(Selector::All) => 1,
                Some(Selector::AllSub(sub)) => 1 + sub.wildcard_count(),
                Some(Selector::IndexSub(_, sub)) => sub.wildcard_count(),
                _ => 0,
            })
            .sum()
    }

    /// Whether the path contains a wildcard selector.
    pub fn has_wildcard(&self) -> bool {
        self.wildcard_count() > 0
    }

    /// The leading object key.
    pub fn first_key(&self) -> &str {
        &self.parts[0].key
    }

    /// Flatten into a [`PathShape`], unrolling selectors.
    ///
    /// Rejects paths with more than one wildcard and paths where a
    /// wildcard selector is followed by further dotted components
    /// (write `x[*|y]` rather than `x[*].y`).
    pub fn shape(&self) -> StoreResult<PathShape> {
        if self.wildcard_count() > 1 {
            return Err(StoreError::validation(format!(
                "path '{self}' has more than one wildcard selector"
            )));
        }
        let mut steps = Vec::new();
        for (i, part) in self.parts.iter().enumerate() {
            steps.push(Step::Key(part.key.clone()));
            match &part.selector {
                None => {}
                Some(Selector::Index(n)) => steps.push(Step::Index(*n)),
                Some(Selector::IndexSub(n, sub)) => {
                    steps.push(Step::Index(*n));
                    match sub.shape()? {
                        PathShape::Simple(inner) => steps.extend(inner),
                        PathShape::Wild { outer, inner } => {
                            if i + 1 != self.parts.len() {
                                return Err(trailing_after_wildcard(self));
                            }
                            let mut full = steps;
                            full.extend(outer);
                            return Ok(PathShape::Wild { outer: full, inner });
                        }
                    }
                }
                Some(Selector::All) => {
                    if i + 1 != self.parts.len() {
                        return Err(trailing_after_wildcard(self));
                    }
                    return Ok(PathShape::Wild {
                        outer: steps,
                        inner: Vec::new(),
                    });
                }
                Some(Selector::AllSub(sub)) => {
                    if i + 1 != self.parts.len() {
                        return Err(trailing_after_wildcard(self));
                    }
                    let inner = match sub.shape()? {
                        PathShape::Simple(inner) => inner,
                        PathShape::Wild { .. } => {
                            return Err(StoreError::validation(format!(
                                "path '{self}' has more than one wildcard selector"
                            )));
                        }
                    };
                    return Ok(PathShape::Wild {
                        outer: steps,
                        inner,
                    });
                }
            }
        }
        Ok(PathShape::Simple(steps))
    }
}

fn trailing_after_wildcard(path: &Path) -> StoreError {
    StoreError::validation(format!(
        "path '{path}' continues after a wildcard selector; use [*|...]"
    ))
}

/// Whether a key can be written unquoted in a path.
pub(crate) fn is_bare_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            if is_bare_key(&part.key) {
                f.write_str(&part.key)?;
            } else {
                write!(f, "'{}'", part.key.replace('\'', "\\'"))?;
            }
            match &part.selector {
                None => {}
                Some(Selector::Index(n)) => write!(f, "[{n}]")?,
                Some(Selector::All) => f.write_str("[*]")?,
                Some(Selector::IndexSub(n, sub)) => write!(f, "[{n}|{sub}]")?,
                Some(Selector::AllSub(sub)) => write!(f, "[*|{sub}]")?,
            }
        }
        Ok(())
    }
}
