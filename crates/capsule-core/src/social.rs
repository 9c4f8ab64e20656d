//! Comments and likes attached to public capsules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, store::Document};

// ─── Comment ─────────────────────────────────────────────────────────────────

/// A comment on exactly one capsule. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  #[serde(rename = "$id")]
  pub id:         String,
  pub capsule_id: String,
  pub text:       String,
  pub user_id:    String,
  #[serde(default)]
  pub user_name:  String,
  pub created_at: DateTime<Utc>,
  /// Reply threading; part of the record but no flow sets it yet.
  #[serde(default)]
  pub parent_id:  Option<String>,
}

impl Comment {
  pub fn from_document(doc: Document) -> Result<Self> {
    Ok(serde_json::from_value(doc.into_value())?)
  }

  pub fn fields(
    capsule_id: &str,
    user_id: &str,
    user_name: &str,
    text: &str,
    now: DateTime<Utc>,
  ) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("capsuleId".into(), Value::String(capsule_id.to_owned()));
    fields.insert("userId".into(), Value::String(user_id.to_owned()));
    fields.insert("userName".into(), Value::String(user_name.to_owned()));
    fields.insert("text".into(), Value::String(text.to_owned()));
    fields.insert("createdAt".into(), Value::String(now.to_rfc3339()));
    fields
  }
}

/// Sort comments newest first. Equal timestamps keep their relative order.
pub fn sort_newest_first(comments: &mut [Comment]) {
  comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Trim comment text, rejecting text that is empty after trimming.
pub fn normalize_comment_text(text: &str) -> Result<String> {
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return Err(Error::Validation("comment text is required".into()));
  }
  Ok(trimmed.to_owned())
}

// ─── Like ────────────────────────────────────────────────────────────────────

/// A (user, capsule) membership fact.
///
/// At most one should exist per pair, but nothing in storage enforces it;
/// see the gateway's `toggle_like`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
  #[serde(rename = "$id")]
  pub id:         String,
  pub capsule_id: String,
  pub user_id:    String,
  pub created_at: DateTime<Utc>,
}

impl Like {
  pub fn from_document(doc: Document) -> Result<Self> {
    Ok(serde_json::from_value(doc.into_value())?)
  }

  pub fn fields(
    capsule_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
  ) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("capsuleId".into(), Value::String(capsule_id.to_owned()));
    fields.insert("userId".into(), Value::String(user_id.to_owned()));
    fields.insert("createdAt".into(), Value::String(now.to_rfc3339()));
    fields
  }
}
