//! Backend ports: the document store, object storage and session API the
//! application delegates all persistence and identity to.
//!
//! The traits are implemented by `capsule-hosted` (the hosted service over
//! HTTP) and `capsule-store-sqlite` (a local stand-in). Higher layers
//! (`capsule-service`, `capsule-api`) depend on these abstractions only, so
//! test doubles slot in wherever a backend is expected.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  capsule::MediaUpload,
  error::BackendError,
  session::{Credentials, NewAccount, Session, User},
};

/// Page size a backend applies when a query carries no [`Query::Limit`].
/// No cursor is exposed beyond it.
pub const DEFAULT_PAGE_SIZE: usize = 25;

// ─── Addressing ──────────────────────────────────────────────────────────────

/// A collection is addressed by two configuration-supplied identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
  pub database_id:   String,
  pub collection_id: String,
}

impl CollectionRef {
  pub fn new(database_id: impl Into<String>, collection_id: impl Into<String>) -> Self {
    Self {
      database_id:   database_id.into(),
      collection_id: collection_id.into(),
    }
  }

  /// `databases.<db>.collections.<collection>.documents`, the realtime
  /// channel for this collection.
  pub fn channel(&self) -> String {
    format!(
      "databases.{}.collections.{}.documents",
      self.database_id, self.collection_id
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketRef {
  pub bucket_id: String,
}

impl BucketRef {
  pub fn new(bucket_id: impl Into<String>) -> Self {
    Self { bucket_id: bucket_id.into() }
  }
}

// ─── Documents ───────────────────────────────────────────────────────────────

/// A schemaless stored document: an id plus its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  #[serde(rename = "$id")]
  pub id:   String,
  #[serde(flatten)]
  pub data: Map<String, Value>,
}

impl Document {
  pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
    Self { id: id.into(), data }
  }

  pub fn get_str(&self, attribute: &str) -> Option<&str> {
    self.data.get(attribute).and_then(Value::as_str)
  }

  /// The document as a single JSON object with `$id` inlined, ready for
  /// typed deserialisation.
  pub fn into_value(self) -> Value {
    let mut data = self.data;
    data.insert("$id".into(), Value::String(self.id));
    Value::Object(data)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentList {
  pub total:     u64,
  pub documents: Vec<Document>,
}

/// A filter, ordering or limit applied by `list_documents`.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  Equal(String, Value),
  OrderAsc(String),
  OrderDesc(String),
  Limit(usize),
}

impl Query {
  pub fn equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::Equal(attribute.into(), value.into())
  }

  pub fn order_desc(attribute: impl Into<String>) -> Self {
    Self::OrderDesc(attribute.into())
  }
}

// ─── Push events ─────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
  Create,
  Update,
  Delete,
}

/// A change pushed by the backend for a subscribed collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEvent {
  pub kind:       EventKind,
  pub collection: CollectionRef,
  pub document:   Document,
}

/// Receiving end of a push subscription. Dropping it ends the subscription.
pub type Subscription = tokio::sync::mpsc::Receiver<DocumentEvent>;

// ─── Files ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
  #[serde(rename = "$id")]
  pub id:        String,
  #[serde(default)]
  pub name:      String,
  #[serde(default)]
  pub mime_type: String,
  #[serde(default, rename = "sizeOriginal")]
  pub size:      u64,
}

#[derive(Debug, Clone)]
pub struct FileContent {
  pub content_type: String,
  pub bytes:        bytes::Bytes,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// The hosted document database's generic query interface.
pub trait DocumentStore: Send + Sync {
  fn list_documents<'a>(
    &'a self,
    collection: &'a CollectionRef,
    queries: &'a [Query],
  ) -> impl Future<Output = Result<DocumentList, BackendError>> + Send + 'a;

  /// Fetch one document. Returns `None` if it does not exist.
  fn get_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Document>, BackendError>> + Send + 'a;

  /// Insert a document; the store assigns its id.
  fn create_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    data: Map<String, Value>,
  ) -> impl Future<Output = Result<Document, BackendError>> + Send + 'a;

  /// Overwrite the given attributes; others are left untouched.
  fn update_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
    data: Map<String, Value>,
  ) -> impl Future<Output = Result<Document, BackendError>> + Send + 'a;

  fn delete_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a;

  /// Subscribe to change events on a collection.
  fn subscribe<'a>(
    &'a self,
    collection: &'a CollectionRef,
  ) -> impl Future<Output = Result<Subscription, BackendError>> + Send + 'a;
}

/// The hosted object storage for capsule media.
pub trait FileStorage: Send + Sync {
  fn create_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    upload: MediaUpload,
  ) -> impl Future<Output = Result<StoredFile, BackendError>> + Send + 'a;

  fn delete_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a;

  /// Fetch a stored file's bytes. Returns `None` if it does not exist.
  fn read_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> impl Future<Output = Result<Option<FileContent>, BackendError>> + Send + 'a;

  /// A fetchable URL for an image-sized preview of the file.
  fn file_preview_url(&self, bucket: &BucketRef, file_id: &str) -> String;

  /// A fetchable URL for the original file.
  fn file_download_url(&self, bucket: &BucketRef, file_id: &str) -> String;
}

/// The hosted session and identity API.
pub trait AccountApi: Send + Sync {
  /// The user behind a session secret. `Unauthorized` if the session is
  /// absent or expired.
  fn get<'a>(
    &'a self,
    secret: &'a str,
  ) -> impl Future<Output = Result<User, BackendError>> + Send + 'a;

  fn create<'a>(
    &'a self,
    account: &'a NewAccount,
  ) -> impl Future<Output = Result<User, BackendError>> + Send + 'a;

  fn create_email_password_session<'a>(
    &'a self,
    credentials: &'a Credentials,
  ) -> impl Future<Output = Result<Session, BackendError>> + Send + 'a;

  /// End the session identified by `secret`.
  fn delete_session<'a>(
    &'a self,
    secret: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a;
}

/// Everything the application needs from its backend, bundled.
pub trait Backend:
  DocumentStore + FileStorage + AccountApi + Clone + 'static
{
}

impl<T> Backend for T where
  T: DocumentStore + FileStorage + AccountApi + Clone + 'static
{
}
