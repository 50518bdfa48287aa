//! Client-side path resolution.
//!
//! Resolves a [`Path`] against an in-memory document the same way the SQL
//! generator does inside the database: missing components yield `Null`, a
//! wildcard yields the array of per-element results. The restore engine uses
//! this to key audit rows by primary key, and the test suites use it to
//! cross-check generated projections.

use serde_json::Value;

use crate::path::{Path, PathShape, Step};

/// Resolve `path` against `doc`. Pure: equal inputs always produce equal
/// output, with `Null` for anything that does not exist.
pub fn lookup(doc: &Value, path: &Path) -> Value {
    match path.shape() {
        Ok(PathShape::Simple(steps)) => walk(doc, &steps).cloned().unwrap_or(Value::Null),
        Ok(PathShape::Wild { outer, inner }) => match walk(doc, &outer) {
            Some(Value::Array(elements)) => Value::Array(
                elements
                    .iter()
                    .map(|el| walk(el, &inner).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
            _ => Value::Null,
        },
        Err(_) => Value::Null,
    }
}

fn walk<'a>(doc: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    let mut current = doc;
    for step in steps {
        current = match step {
            Step::Key(k) => current.as_object()?.get(k)?,
            Step::Index(i) => current.as_array()?.get(*i as usize)?,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_nested_key() {
        let doc = json!({"d": {"e": 45}});
        assert_eq!(lookup(&doc, &Path::parse("d.e").unwrap()), json!(45));
    }

    #[test]
    fn lookup_missing_is_null() {
        let doc = json!({"a": 1});
        assert_eq!(lookup(&doc, &Path::parse("b.c").unwrap()), Value::Null);
    }

    #[test]
    fn lookup_array_index() {
        let doc = json!({"x": [{"a": 0}, {"a": 77}]});
        assert_eq!(lookup(&doc, &Path::parse("x[1|a]").unwrap()), json!(77));
    }

    #[test]
    fn lookup_wildcard_collects() {
        let doc = json!({"x": [{"a": 0}, {"a": 77, "h": 11}]});
        assert_eq!(lookup(&doc, &Path::parse("x[*|a]").unwrap()), json!([0, 77]));
        assert_eq!(
            lookup(&doc, &Path::parse("x[*|h]").unwrap()),
            json!([null, 11])
        );
    }

    #[test]
    fn lookup_wildcard_on_missing_is_null() {
        let doc = json!({"a": 1});
        assert_eq!(lookup(&doc, &Path::parse("x[*|a]").unwrap()), Value::Null);
    }
}
