//! Audit journal records and restore planning.
//!
//! Every mutation writes one [`AuditRecord`] per affected document into the
//! sibling `<table>_audit` table. The records are themselves JSON documents,
//! so they can be queried with the same URI language and filtered by a
//! restore's `where=` clause. Restore planning is pure: given decoded audit
//! rows and a primary-key path, it picks the newest pre-image per key.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ast::Literal;
use crate::eval;
use crate::path::Path;

/// The kind of event an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    Update,
    Delete,
    Create,
    Read,
}

/// One immutable journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub timestamp: DateTime<Utc>,
    /// Opaque actor identifier supplied by the caller.
    pub identity: String,
    pub identity_name: Option<String>,
    /// Free-form reason from the query's `message=` clause.
    pub reason: Option<String>,
    /// The whole document as it existed before the mutation; null for
    /// `create` and `read`.
    pub previous: Option<Value>,
    /// The keys mutated by an update, null otherwise.
    pub diff: Option<Value>,
    /// Groups all rows produced by one user call.
    pub transaction_id: Uuid,
    /// The original URI query string.
    pub query: String,
}

impl AuditRecord {
    pub(crate) fn to_doc(&self) -> Value {
        serde_json::to_value(self).expect("audit records always serialise")
    }

    pub(crate) fn from_doc(doc: Value) -> Option<Self> {
        serde_json::from_value(doc).ok()
    }
}

/// Per-call audit state: the actor, reason, and shared transaction id
/// copied into every record the call produces.
#[derive(Debug, Clone)]
pub(crate) struct AuditContext {
    pub identity: String,
    pub identity_name: Option<String>,
    pub reason: Option<String>,
    pub transaction_id: Uuid,
    pub query: String,
}

impl AuditContext {
    pub fn record(
        &self,
        event: AuditEvent,
        previous: Option<Value>,
        diff: Option<Value>,
    ) -> AuditRecord {
        AuditRecord {
            event,
            timestamp: Utc::now(),
            identity: self.identity.clone(),
            identity_name: self.identity_name.clone(),
            reason: self.reason.clone(),
            previous,
            diff,
            transaction_id: self.transaction_id,
            query: self.query.clone(),
        }
    }
}

/// The `diff` of an update: the patch restricted to the `set=` keys.
pub(crate) fn update_diff(patch: &Map<String, Value>, set_keys: &[String]) -> Value {
    let mut diff = Map::new();
    for key in set_keys {
        diff.insert(key.clone(), patch.get(key).cloned().unwrap_or(Value::Null));
    }
    Value::Object(diff)
}

/// One document to put back: the key it is addressed by and the pre-image
/// to re-establish.
#[derive(Debug, Clone)]
pub(crate) struct RestoreItem {
    pub key: Value,
    pub key_literal: Literal,
    pub target: Value,
}

/// Group candidate audit rows by primary key and keep the newest pre-image
/// per key: greatest timestamp wins, ties broken by greatest transaction id.
/// Rows whose `previous` lacks the key are skipped.
pub(crate) fn restore_plan(records: &[AuditRecord], primary_key: &Path) -> Vec<RestoreItem> {
    let mut best: HashMap<String, (DateTime<Utc>, Uuid, RestoreItem)> = HashMap::new();
    for record in records {
        if !matches!(record.event, AuditEvent::Update | AuditEvent::Delete) {
            continue;
        }
        let Some(previous) = &record.previous else {
            continue;
        };
        let key = eval::lookup(previous, primary_key);
        let Some(key_literal) = literal_from_value(&key) else {
            continue;
        };
        let map_key = key.to_string();
        let candidate = (
            record.timestamp,
            record.transaction_id,
            RestoreItem {
                key,
                key_literal,
                target: previous.clone(),
            },
        );
        match best.get(&map_key) {
            Some((ts, txid, _)) if (*ts, *txid) >= (candidate.0, candidate.1) => {}
            _ => {
                best.insert(map_key, candidate);
            }
        }
    }
    let mut items: Vec<(String, RestoreItem)> = best
        .into_iter()
        .map(|(map_key, (_, _, item))| (map_key, item))
        .collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.into_iter().map(|(_, item)| item).collect()
}

/// Convert a scalar document value into a comparison literal. Arrays,
/// objects, and null cannot key a restore.
pub(crate) fn literal_from_value(value: &Value) -> Option<Literal> {
    match value {
        Value::Number(n) => Some(Literal::Number(n.as_f64()?)),
        Value::String(s) => Some(Literal::Text(s.clone())),
        Value::Bool(b) => Some(Literal::Bool(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(
        event: AuditEvent,
        previous: Value,
        secs: i64,
        txid: u128,
    ) -> AuditRecord {
        AuditRecord {
            event,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            identity: "someone".to_string(),
            identity_name: None,
            reason: None,
            previous: Some(previous),
            diff: None,
            transaction_id: Uuid::from_u128(txid),
            query: String::new(),
        }
    }

    #[test]
    fn plan_keeps_latest_per_key() {
        let pk = Path::parse("id").unwrap();
        let records = vec![
            record(AuditEvent::Update, json!({"id": 1, "v": "old"}), 10, 1),
            record(AuditEvent::Update, json!({"id": 1, "v": "older"}), 5, 2),
            record(AuditEvent::Delete, json!({"id": 2, "v": "gone"}), 7, 3),
        ];
        let plan = restore_plan(&records, &pk);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].target, json!({"id": 1, "v": "old"}));
        assert_eq!(plan[1].target, json!({"id": 2, "v": "gone"}));
    }

    #[test]
    fn plan_breaks_timestamp_ties_by_transaction_id() {
        let pk = Path::parse("id").unwrap();
        let records = vec![
            record(AuditEvent::Update, json!({"id": 1, "v": "a"}), 10, 9),
            record(AuditEvent::Update, json!({"id": 1, "v": "b"}), 10, 4),
        ];
        let plan = restore_plan(&records, &pk);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].target, json!({"id": 1, "v": "a"}));
    }

    #[test]
    fn plan_skips_creates_and_keyless_rows() {
        let pk = Path::parse("id").unwrap();
        let mut create = record(AuditEvent::Create, json!({"id": 3}), 1, 1);
        create.previous = None;
        let records = vec![
            create,
            record(AuditEvent::Update, json!({"other": true}), 2, 2),
        ];
        assert!(restore_plan(&records, &pk).is_empty());
    }

    #[test]
    fn update_diff_restricts_to_set_keys() {
        let mut patch = Map::new();
        patch.insert("a".to_string(), json!(1));
        patch.insert("b".to_string(), json!(2));
        let diff = update_diff(&patch, &["a".to_string()]);
        assert_eq!(diff, json!({"a": 1}));
    }

    #[test]
    fn record_round_trips_through_document_form() {
        let ctx = AuditContext {
            identity: "svc".to_string(),
            identity_name: Some("Service".to_string()),
            reason: Some("cleanup".to_string()),
            transaction_id: Uuid::from_u128(7),
            query: "where=a=eq.1".to_string(),
        };
        let rec = ctx.record(AuditEvent::Delete, Some(json!({"a": 1})), None);
        let back = AuditRecord::from_doc(rec.to_doc()).unwrap();
        assert_eq!(back.event, AuditEvent::Delete);
        assert_eq!(back.previous, Some(json!({"a": 1})));
        assert_eq!(back.transaction_id, Uuid::from_u128(7));
        assert_eq!(back.query, "where=a=eq.1");
    }
}
