//! Wire encoding of document queries: one JSON object per `queries[]`
//! parameter.

use capsule_core::store::Query;
use serde_json::{Value, json};

pub fn encode(query: &Query) -> String {
  let value = match query {
    Query::Equal(attribute, value) => json!({
      "method": "equal",
      "attribute": attribute,
      "values": values(value),
    }),
    Query::OrderAsc(attribute) => json!({ "method": "orderAsc", "attribute": attribute }),
    Query::OrderDesc(attribute) => json!({ "method": "orderDesc", "attribute": attribute }),
    Query::Limit(n) => json!({ "method": "limit", "values": [n] }),
  };
  value.to_string()
}

pub fn params(queries: &[Query]) -> Vec<(&'static str, String)> {
  queries.iter().map(|q| ("queries[]", encode(q))).collect()
}

fn values(value: &Value) -> Value {
  match value {
    Value::Array(_) => value.clone(),
    other => Value::Array(vec![other.clone()]),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equal_wraps_scalar_in_values() {
    let q: Value = serde_json::from_str(&encode(&Query::equal("userId", "u1"))).unwrap();
    assert_eq!(q, json!({ "method": "equal", "attribute": "userId", "values": ["u1"] }));
  }

  #[test]
  fn order_and_limit() {
    let q: Value = serde_json::from_str(&encode(&Query::order_desc("createdAt"))).unwrap();
    assert_eq!(q, json!({ "method": "orderDesc", "attribute": "createdAt" }));
    let q: Value = serde_json::from_str(&encode(&Query::Limit(100))).unwrap();
    assert_eq!(q, json!({ "method": "limit", "values": [100] }));
  }

  #[test]
  fn every_query_is_a_queries_param() {
    let p = params(&[Query::equal("isPublic", true), Query::Limit(1)]);
    assert_eq!(p.len(), 2);
    assert!(p.iter().all(|(k, _)| *k == "queries[]"));
  }
}
