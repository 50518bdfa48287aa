//! Golden tests for the SQL compiler, both dialects.

use serde_json::{Map, json};

use crate::ast::UriQuery;
use crate::sql::{Generator, PostgresDialect, RowShape, SqlParam, SqliteDialect, Statement};

fn sqlite(query: &str) -> (Statement, RowShape) {
    let q = UriQuery::parse(query).unwrap();
    Generator::new(&SqliteDialect, "docs", "things")
        .unwrap()
        .select(&q)
        .unwrap()
}

fn postgres(query: &str) -> (Statement, RowShape) {
    let q = UriQuery::parse(query).unwrap();
    Generator::new(&PostgresDialect, "docs", "things")
        .unwrap()
        .select(&q)
        .unwrap()
}

#[test]
fn select_all_documents() {
    let (stmt, shape) = sqlite("");
    assert_eq!(stmt.sql, "SELECT data FROM \"docs_things\"");
    assert_eq!(shape, RowShape::Document);

    let (stmt, _) = postgres("");
    assert_eq!(stmt.sql, "SELECT data FROM \"docs\".\"things\"");
}

#[test]
fn select_projection_sqlite() {
    let (stmt, shape) = sqlite("select=a,d.e");
    assert_eq!(
        stmt.sql,
        "SELECT json_quote(json_extract(data, '$.a')), \
         json_quote(json_extract(data, '$.d.e')) FROM \"docs_things\""
    );
    assert_eq!(shape, RowShape::Tuple(2));
}

#[test]
fn select_projection_postgres() {
    let (stmt, _) = postgres("select=a,d.e");
    assert_eq!(
        stmt.sql,
        "SELECT data #> '{a}', data #> '{d,e}' FROM \"docs\".\"things\""
    );
}

#[test]
fn select_array_index() {
    let (stmt, _) = sqlite("select=x[1|a]");
    assert_eq!(
        stmt.sql,
        "SELECT json_quote(json_extract(data, '$.x[1].a')) FROM \"docs_things\""
    );

    let (stmt, _) = postgres("select=x[1|a]");
    assert_eq!(stmt.sql, "SELECT data #> '{x,1,a}' FROM \"docs\".\"things\"");
}

#[test]
fn select_wildcard_sqlite() {
    let (stmt, _) = sqlite("select=x[*|a]");
    assert_eq!(
        stmt.sql,
        "SELECT CASE WHEN json_type(data, '$.x') = 'array' THEN \
         (SELECT COALESCE(json_group_array(json_extract(el.value, '$.a')), json('[]')) \
         FROM json_each(json_extract(data, '$.x')) AS el) END FROM \"docs_things\""
    );
}

#[test]
fn select_wildcard_postgres() {
    let (stmt, _) = postgres("select=x[*|a]");
    assert_eq!(
        stmt.sql,
        "SELECT CASE WHEN jsonb_typeof(data #> '{x}') = 'array' THEN \
         (SELECT COALESCE(jsonb_agg(el.value #> '{a}'), '[]'::jsonb) \
         FROM jsonb_array_elements(data #> '{x}') AS el(value)) END \
         FROM \"docs\".\"things\""
    );
}

#[test]
fn where_numeric_comparison() {
    let (stmt, _) = sqlite("where=a=gt.0");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE json_extract(data, '$.a') > ?1"
    );
    assert_eq!(stmt.params, vec![SqlParam::Float(0.0)]);

    let (stmt, _) = postgres("where=a=gt.0");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE (data #>> '{a}')::float8 > $1"
    );
}

#[test]
fn where_text_comparison() {
    let (stmt, _) = postgres("where=b=eq.'yo'");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE data #>> '{b}' = $1"
    );
    assert_eq!(stmt.params, vec![SqlParam::Text("yo".into())]);
}

#[test]
fn where_like_is_glob_on_sqlite() {
    let (stmt, _) = sqlite("where=b=like.'*all'");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE json_extract(data, '$.b') GLOB ?1"
    );
    assert_eq!(stmt.params, vec![SqlParam::Text("*all".into())]);
}

#[test]
fn where_like_translates_on_postgres() {
    let (stmt, _) = postgres("where=b=like.'*all'");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE data #>> '{b}' LIKE $1"
    );
    assert_eq!(stmt.params, vec![SqlParam::Text("%all".into())]);
}

#[test]
fn where_ilike() {
    let (stmt, _) = sqlite("where=b=ilike.'Y*'");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" \
         WHERE json_extract(data, '$.b') LIKE ?1 ESCAPE '\\'"
    );
    assert_eq!(stmt.params, vec![SqlParam::Text("Y%".into())]);

    let (stmt, _) = postgres("where=b=ilike.'Y*'");
    assert!(stmt.sql.contains("ILIKE $1"));
}

#[test]
fn where_left_associative_combinators() {
    let (stmt, _) = sqlite("where=a=eq.1,and:b=eq.2,or:c=eq.3");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE \
         ((json_extract(data, '$.a') = ?1 AND json_extract(data, '$.b') = ?2) \
         OR json_extract(data, '$.c') = ?3)"
    );
    assert_eq!(stmt.params.len(), 3);
}

#[test]
fn where_in_list() {
    let (stmt, _) = postgres("where=a=in.[1,2,3]");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" \
         WHERE (data #>> '{a}')::float8 IN ($1, $2, $3)"
    );
    assert_eq!(stmt.params.len(), 3);
}

#[test]
fn where_in_list_mixed_expands_to_typed_comparisons() {
    let (stmt, _) = sqlite("where=a=in.[1,'two']");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE \
         (json_extract(data, '$.a') = ?1 OR json_extract(data, '$.a') = ?2)"
    );
    assert_eq!(
        stmt.params,
        vec![SqlParam::Float(1.0), SqlParam::Text("two".into())]
    );

    let (stmt, _) = postgres("where=a=in.[1,'two']");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE \
         ((data #>> '{a}')::float8 = $1 OR data #>> '{a}' = $2)"
    );
}

#[test]
fn where_in_list_booleans_compare_as_booleans() {
    let (stmt, _) = sqlite("where=flag=in.[true]");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE (json_extract(data, '$.flag') = ?1)"
    );
    assert_eq!(stmt.params, vec![SqlParam::Bool(true)]);

    let (stmt, _) = postgres("where=flag=in.[true,false]");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE \
         ((data #>> '{flag}')::boolean = $1 OR (data #>> '{flag}')::boolean = $2)"
    );
    assert_eq!(
        stmt.params,
        vec![SqlParam::Bool(true), SqlParam::Bool(false)]
    );
}

#[test]
fn where_not_in_list() {
    let (stmt, _) = sqlite("where=a=not.in.[1,2]");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" \
         WHERE NOT (json_extract(data, '$.a') IN (?1, ?2))"
    );
}

#[test]
fn where_is_null() {
    let (stmt, _) = postgres("where=c=is.null");
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs\".\"things\" WHERE data #>> '{c}' IS NULL"
    );
    let (stmt, _) = postgres("where=c=not.is.null");
    assert!(stmt.sql.ends_with("WHERE data #>> '{c}' IS NOT NULL"));
}

#[test]
fn where_wildcard_rejected() {
    let q = UriQuery::parse("where=x[*|a]=eq.0").unwrap();
    let err = Generator::new(&SqliteDialect, "docs", "things")
        .unwrap()
        .select(&q)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn group_by_with_stable_order() {
    let (stmt, shape) = sqlite("select=b,sum(a)&group_by=b");
    assert_eq!(
        stmt.sql,
        "SELECT json_quote(json_extract(data, '$.b')), \
         json_quote(sum(json_extract(data, '$.a'))) FROM \"docs_things\" \
         GROUP BY json_extract(data, '$.b') \
         ORDER BY json_extract(data, '$.b') ASC"
    );
    assert_eq!(shape, RowShape::Tuple(2));

    let (stmt, _) = postgres("select=b,sum(a)&group_by=b");
    assert_eq!(
        stmt.sql,
        "SELECT data #> '{b}', to_jsonb(sum((data #>> '{a}')::float8)) \
         FROM \"docs\".\"things\" GROUP BY data #> '{b}' \
         ORDER BY data #> '{b}' ASC NULLS FIRST"
    );
}

#[test]
fn explicit_order_overrides_group_order() {
    let (stmt, _) = postgres("select=a&order=a.desc");
    assert_eq!(
        stmt.sql,
        "SELECT data #> '{a}' FROM \"docs\".\"things\" \
         ORDER BY data #> '{a}' DESC NULLS LAST"
    );
}

#[test]
fn range_is_inclusive() {
    let (stmt, _) = sqlite("range=2.3");
    assert!(stmt.sql.ends_with("LIMIT 2 OFFSET 2"));
    let (stmt, _) = sqlite("range=2.4");
    assert!(stmt.sql.ends_with("LIMIT 3 OFFSET 2"));
}

#[test]
fn aggregates_only() {
    let (stmt, shape) = sqlite("select=count(*)");
    assert_eq!(stmt.sql, "SELECT json_quote(count(*)) FROM \"docs_things\"");
    assert_eq!(shape, RowShape::Tuple(1));
}

#[test]
fn timestamp_aggregates() {
    let (stmt, _) = sqlite("select=max_ts(t)");
    assert_eq!(
        stmt.sql,
        "SELECT json_quote(max(datetime(json_extract(data, '$.t')))) FROM \"docs_things\""
    );

    let (stmt, _) = postgres("select=min_ts(t)");
    assert_eq!(
        stmt.sql,
        "SELECT to_jsonb(min((data #>> '{t}')::timestamptz)) FROM \"docs\".\"things\""
    );
}

#[test]
fn quoted_key_paths() {
    let (stmt, _) = sqlite("select='odd key'.a");
    assert_eq!(
        stmt.sql,
        "SELECT json_quote(json_extract(data, '$.\"odd key\".a')) FROM \"docs_things\""
    );

    let (stmt, _) = postgres("select='odd key'.a");
    assert_eq!(
        stmt.sql,
        "SELECT data #> '{\"odd key\",a}' FROM \"docs\".\"things\""
    );
}

#[test]
fn update_merge_sqlite() {
    let q = UriQuery::parse("set=saying&where=id=eq.1").unwrap();
    let mut patch = Map::new();
    patch.insert("saying".to_string(), json!("excellent"));
    let stmt = Generator::new(&SqliteDialect, "docs", "things")
        .unwrap()
        .update(&q, q.set.as_ref().unwrap(), &patch)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE \"docs_things\" SET data = json_set(data, '$.saying', json(?1)) \
         WHERE json_extract(data, '$.id') = ?2"
    );
    assert_eq!(
        stmt.params,
        vec![
            SqlParam::Json(json!("excellent")),
            SqlParam::Float(1.0)
        ]
    );
}

#[test]
fn update_merge_postgres() {
    let q = UriQuery::parse("set=saying&where=id=eq.1").unwrap();
    let mut patch = Map::new();
    patch.insert("saying".to_string(), json!("excellent"));
    patch.insert("ignored".to_string(), json!(true));
    let stmt = Generator::new(&PostgresDialect, "docs", "things")
        .unwrap()
        .update(&q, q.set.as_ref().unwrap(), &patch)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE \"docs\".\"things\" SET data = data || $1::jsonb \
         WHERE (data #>> '{id}')::float8 = $2"
    );
    // Only the keys listed in set= reach the merge.
    assert_eq!(
        stmt.params[0],
        SqlParam::Json(json!({"saying": "excellent"}))
    );
}

#[test]
fn delete_requires_where() {
    let q = UriQuery::parse("").unwrap();
    let generator = Generator::new(&SqliteDialect, "docs", "things").unwrap();
    assert!(generator.delete(&q, false).unwrap_err().is_validation());
    assert_eq!(
        generator.delete(&q, true).unwrap().sql,
        "DELETE FROM \"docs_things\""
    );
}

#[test]
fn insert_statements() {
    let doc = json!({"a": 1});
    let stmt = Generator::new(&SqliteDialect, "docs", "things")
        .unwrap()
        .insert(&doc);
    assert_eq!(
        stmt.sql,
        "INSERT INTO \"docs_things\" (data) VALUES (json(?1))"
    );

    let stmt = Generator::new(&PostgresDialect, "docs", "things")
        .unwrap()
        .insert(&doc);
    assert_eq!(stmt.sql, "INSERT INTO \"docs\".\"things\" (data) VALUES ($1)");
}

#[test]
fn create_table_statements() {
    let stmts = Generator::new(&SqliteDialect, "docs", "things")
        .unwrap()
        .create_table();
    assert_eq!(stmts.len(), 1);
    assert_eq!(
        stmts[0].sql,
        "CREATE TABLE IF NOT EXISTS \"docs_things\" (data TEXT)"
    );

    let stmts = Generator::new(&PostgresDialect, "docs", "things")
        .unwrap()
        .create_table();
    assert_eq!(stmts[0].sql, "CREATE SCHEMA IF NOT EXISTS \"docs\"");
    assert_eq!(
        stmts[1].sql,
        "CREATE TABLE IF NOT EXISTS \"docs\".\"things\" (data jsonb NOT NULL)"
    );
}

#[test]
fn create_unique_index() {
    use crate::path::Step;
    let stmt = Generator::new(&PostgresDialect, "docs", "things")
        .unwrap()
        .create_index(&[Step::Key("id".into())], true);
    assert_eq!(
        stmt.sql,
        "CREATE UNIQUE INDEX IF NOT EXISTS \"docs_things_id_uq\" \
         ON \"docs\".\"things\" ((data #>> '{id}'))"
    );
}

#[test]
fn rejected_identifiers() {
    assert!(Generator::new(&SqliteDialect, "docs", "bad-name").is_err());
    assert!(Generator::new(&SqliteDialect, "1docs", "things").is_err());
    assert!(Generator::new(&SqliteDialect, "docs", "things; drop").is_err());
}

#[test]
fn select_by_key_round_trip() {
    use crate::ast::Literal;
    use crate::path::Step;
    let steps = vec![Step::Key("id".into())];
    let generator = Generator::new(&SqliteDialect, "docs", "things").unwrap();
    let stmt = generator
        .select_by_key(&steps, &Literal::Number(1.0))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT data FROM \"docs_things\" WHERE json_extract(data, '$.id') = ?1"
    );

    let stmt = generator
        .overwrite_by_key(&steps, &Literal::Number(1.0), &json!({"id": 1}))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE \"docs_things\" SET data = json(?1) \
         WHERE json_extract(data, '$.id') = ?2"
    );
}
