//! The capsule record: a user-owned content bundle with a scheduled open
//! time.
//!
//! Field names on the wire follow the hosted document store's conventions
//! (`$id`, camelCase attributes) so that a stored document decodes straight
//! into a [`Capsule`].

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  lifecycle::{self, CapsuleState},
  store::Document,
};

/// How many hours after creation the owner may still edit or delete a
/// capsule.
pub const EDIT_WINDOW_HOURS: i64 = 12;

/// [`EDIT_WINDOW_HOURS`] as a duration.
pub fn edit_window() -> Duration { Duration::hours(EDIT_WINDOW_HOURS) }

// ─── Capsule ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
  /// Opaque id assigned by the backing store.
  #[serde(rename = "$id")]
  pub id:             String,
  pub title:          String,
  pub description:    String,
  /// Caller-chosen; may lie before or after `created_at`.
  pub open_date:      DateTime<Utc>,
  pub created_at:     DateTime<Utc>,
  /// Always `created_at + edit_window()`; never changed after creation.
  pub editable_until: DateTime<Utc>,
  #[serde(default)]
  pub file_id:        Option<String>,
  #[serde(default)]
  pub is_public:      bool,
  pub user_id:        String,
  #[serde(default)]
  pub user_name:      String,
}

impl Capsule {
  /// Decode a stored document.
  pub fn from_document(doc: Document) -> Result<Self> {
    Ok(serde_json::from_value(doc.into_value())?)
  }

  /// Evaluate the lifecycle of this capsule at `now`.
  pub fn state_at(&self, now: DateTime<Utc>) -> CapsuleState {
    lifecycle::evaluate(self.created_at, self.open_date, now)
  }

  pub fn is_owned_by(&self, user_id: &str) -> bool { self.user_id == user_id }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// A binary media file to be placed in object storage.
#[derive(Debug, Clone)]
pub struct MediaUpload {
  pub file_name:    String,
  pub content_type: String,
  pub bytes:        Bytes,
}

/// Input to capsule creation. `created_at`, `editable_until` and the owner
/// are always set by the gateway; they are not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewCapsule {
  pub title:       String,
  pub description: String,
  pub open_date:   DateTime<Utc>,
  pub file:        Option<MediaUpload>,
  /// Defaults to `false`.
  pub is_public:   Option<bool>,
}

impl NewCapsule {
  pub fn new(
    title: impl Into<String>,
    description: impl Into<String>,
    open_date: DateTime<Utc>,
  ) -> Self {
    Self {
      title: title.into(),
      description: description.into(),
      open_date,
      file: None,
      is_public: None,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(Error::Validation("title is required".into()));
    }
    Ok(())
  }

  /// Build the document fields for a capsule created at `now`.
  pub fn into_fields(
    self,
    owner_id: &str,
    owner_name: &str,
    file_id: Option<String>,
    now: DateTime<Utc>,
  ) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("title".into(), Value::String(self.title));
    fields.insert("description".into(), Value::String(self.description));
    fields.insert("openDate".into(), timestamp(self.open_date));
    fields.insert("fileId".into(), file_id.map_or(Value::Null, Value::String));
    fields.insert("isPublic".into(), Value::Bool(self.is_public.unwrap_or(false)));
    fields.insert("userId".into(), Value::String(owner_id.to_owned()));
    fields.insert("userName".into(), Value::String(owner_name.to_owned()));
    fields.insert("createdAt".into(), timestamp(now));
    fields.insert("editableUntil".into(), timestamp(now + edit_window()));
    fields
  }
}

/// A partial overwrite of a capsule's user-editable fields.
///
/// Owner and timestamps are deliberately absent: they never change after
/// creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsulePatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title:       Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub open_date:   Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_public:   Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub file_id:     Option<String>,
}

impl CapsulePatch {
  pub fn is_empty(&self) -> bool { self == &Self::default() }

  pub fn validate(&self) -> Result<()> {
    if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
      return Err(Error::Validation("title cannot be empty".into()));
    }
    Ok(())
  }

  pub fn into_fields(self) -> Result<Map<String, Value>> {
    match serde_json::to_value(self)? {
      Value::Object(map) => Ok(map),
      _ => Ok(Map::new()),
    }
  }
}

fn timestamp(dt: DateTime<Utc>) -> Value { Value::String(dt.to_rfc3339()) }
