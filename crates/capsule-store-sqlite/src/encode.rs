//! Encoding helpers between domain values and SQLite columns, and the
//! translation of document queries into SQL.
//!
//! Timestamps are stored as RFC 3339 strings. Attribute filters run through
//! `json_extract` against the `data` column.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use capsule_core::store::{DEFAULT_PAGE_SIZE, Query};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Ids and timestamps ──────────────────────────────────────────────────────

/// A fresh opaque id: 32 lowercase hex characters.
pub fn new_id() -> String { Uuid::new_v4().simple().to_string() }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

/// A fresh session secret, hex-encoded.
pub fn new_secret() -> String {
  let mut raw = [0u8; 32];
  OsRng.fill_bytes(&mut raw);
  hex::encode(raw)
}

/// The digest a session secret is stored and looked up by.
pub fn hash_secret(secret: &str) -> String {
  hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn hash_password(password: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| Error::PasswordHash(e.to_string()))
}

pub fn verify_password(password: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
    .is_ok()
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// SQL for one `list_documents` call. `params` bind the `WHERE` clause,
/// which both statements share.
#[derive(Debug)]
pub struct ListSql {
  pub select: String,
  pub count:  String,
  pub params: Vec<SqlValue>,
}

pub fn list_sql(collection_id: &str, queries: &[Query]) -> Result<ListSql> {
  let mut filters = vec!["collection = ?1".to_owned()];
  let mut params = vec![SqlValue::Text(collection_id.to_owned())];
  let mut order = Vec::new();
  let mut limit = DEFAULT_PAGE_SIZE;

  for query in queries {
    match query {
      Query::Equal(attr, value) => {
        params.push(SqlValue::Text(json_path(attr)?));
        let path = params.len();
        match json_scalar(value)? {
          Some(v) => {
            params.push(v);
            filters.push(format!("json_extract(data, ?{path}) = ?{}", params.len()));
          }
          None => filters.push(format!("json_extract(data, ?{path}) IS NULL")),
        }
      }
      // Paths are validated, so they can be inlined.
      Query::OrderAsc(attr) => {
        order.push(format!("json_extract(data, '{}') ASC", json_path(attr)?))
      }
      Query::OrderDesc(attr) => {
        order.push(format!("json_extract(data, '{}') DESC", json_path(attr)?))
      }
      Query::Limit(n) => limit = *n,
    }
  }
  order.push("rowid ASC".to_owned());

  let filter = filters.join(" AND ");
  Ok(ListSql {
    select: format!(
      "SELECT document_id, data FROM documents WHERE {filter} ORDER BY {} LIMIT {limit}",
      order.join(", ")
    ),
    count: format!("SELECT COUNT(*) FROM documents WHERE {filter}"),
    params,
  })
}

fn json_path(attribute: &str) -> Result<String> {
  let valid = !attribute.is_empty()
    && attribute.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if !valid {
    return Err(Error::InvalidQuery(format!("attribute {attribute:?}")));
  }
  Ok(format!("$.{attribute}"))
}

/// The SQLite value `json_extract` yields for `value`; `None` for null.
fn json_scalar(value: &Value) -> Result<Option<SqlValue>> {
  Ok(match value {
    Value::Null => None,
    Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
    Value::Number(n) => match n.as_i64() {
      Some(i) => Some(SqlValue::Integer(i)),
      None => Some(SqlValue::Real(n.as_f64().unwrap_or_default())),
    },
    Value::String(s) => Some(SqlValue::Text(s.clone())),
    other => return Err(Error::InvalidQuery(format!("cannot compare against {other}"))),
  })
}
