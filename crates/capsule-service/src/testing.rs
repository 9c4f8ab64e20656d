//! A recording in-memory backend for service tests.

use std::{
  collections::{HashMap, HashSet},
  future::Future,
  sync::{Arc, Mutex, MutexGuard},
};

use capsule_core::{
  BackendError,
  capsule::MediaUpload,
  session::{Credentials, NewAccount, Session, User},
  store::{
    AccountApi, BucketRef, CollectionRef, DEFAULT_PAGE_SIZE, Document,
    DocumentEvent, DocumentList, DocumentStore, EventKind, FileContent,
    FileStorage, Query, StoredFile, Subscription,
  },
};
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use tokio::{sync::mpsc, time::Instant};

use crate::config::GatewayConfig;

pub fn gateway_config() -> GatewayConfig {
  GatewayConfig {
    capsules: CollectionRef::new("main", "capsules"),
    comments: CollectionRef::new("main", "comments"),
    likes:    CollectionRef::new("main", "likes"),
    bucket:   BucketRef::new("media"),
  }
}

pub fn user(id: &str) -> User {
  User {
    id:    id.into(),
    name:  format!("User {id}"),
    email: format!("{id}@example.com"),
  }
}

/// One backend call, as observed by the mock.
#[derive(Debug, Clone)]
pub struct Call {
  pub op:         &'static str,
  /// Collection id, bucket id, or `account`.
  pub target:     String,
  /// The `capsuleId` the call was filtered on, when it was.
  pub capsule_id: Option<String>,
  pub at:         Instant,
}

#[derive(Default)]
struct MockState {
  docs:      HashMap<String, Vec<Document>>,
  files:     HashMap<String, MediaUpload>,
  calls:     Vec<Call>,
  next_id:   u64,
  accounts:  Vec<(String, String, User)>,
  sessions:  HashMap<String, User>,
  listeners: Vec<mpsc::Sender<DocumentEvent>>,

  fail_uploads:      bool,
  fail_file_deletes: bool,
  fail_creates_in:   HashSet<String>,
  fail_updates_in:   HashSet<String>,
  fail_deletes_in:   HashSet<String>,
  fail_deletes_of:   HashSet<String>,
  fail_lists_for:    HashSet<String>,
  account_lookups:   usize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
  state: Arc<Mutex<MockState>>,
}

impl MockBackend {
  pub fn new() -> Self { Self::default() }

  fn state(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  // ── Seeding ────────────────────────────────────────────────────────────────

  pub fn insert(&self, collection: &CollectionRef, data: Value) -> String {
    let Value::Object(map) = data else { panic!("seed data must be an object") };
    let mut state = self.state();
    let id = state.fresh_id("doc");
    state
      .docs
      .entry(collection.collection_id.clone())
      .or_default()
      .push(Document::new(id.clone(), map));
    id
  }

  pub fn add_session(&self, secret: &str, user: User) {
    self.state().sessions.insert(secret.into(), user);
  }

  // ── Failure injection ──────────────────────────────────────────────────────

  pub fn fail_uploads(&self) { self.state().fail_uploads = true; }

  pub fn fail_file_deletes(&self) { self.state().fail_file_deletes = true; }

  pub fn fail_creates_in(&self, c: &CollectionRef) {
    self.state().fail_creates_in.insert(c.collection_id.clone());
  }

  pub fn fail_updates_in(&self, c: &CollectionRef) {
    self.state().fail_updates_in.insert(c.collection_id.clone());
  }

  pub fn fail_deletes_in(&self, c: &CollectionRef) {
    self.state().fail_deletes_in.insert(c.collection_id.clone());
  }

  /// Make deletes of one document fail, wherever it lives.
  pub fn fail_delete_of(&self, id: &str) {
    self.state().fail_deletes_of.insert(id.into());
  }

  /// Make every list filtered on `capsule_id` fail.
  pub fn fail_lists_for(&self, capsule_id: &str) {
    self.state().fail_lists_for.insert(capsule_id.into());
  }

  // ── Inspection ─────────────────────────────────────────────────────────────

  pub fn calls(&self) -> Vec<Call> { self.state().calls.clone() }

  pub fn calls_of(&self, op: &str) -> Vec<Call> {
    self.calls().into_iter().filter(|c| c.op == op).collect()
  }

  pub fn documents(&self, collection: &CollectionRef) -> Vec<Document> {
    self
      .state()
      .docs
      .get(&collection.collection_id)
      .cloned()
      .unwrap_or_default()
  }

  pub fn file_ids(&self) -> Vec<String> {
    self.state().files.keys().cloned().collect()
  }

  pub fn account_lookups(&self) -> usize { self.state().account_lookups }

  /// Deliver an event to every open subscription.
  pub async fn push(&self, event: DocumentEvent) {
    let listeners = self.state().listeners.clone();
    for tx in listeners {
      let _ = tx.send(event.clone()).await;
    }
  }
}

impl MockState {
  fn fresh_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{prefix}-{}", self.next_id)
  }

  fn record(&mut self, op: &'static str, target: &str, capsule_id: Option<String>) {
    self.calls.push(Call {
      op,
      target: target.to_owned(),
      capsule_id,
      at: Instant::now(),
    });
  }
}

fn filtered_capsule(queries: &[Query]) -> Option<String> {
  queries.iter().find_map(|q| match q {
    Query::Equal(attr, Value::String(v)) if attr == "capsuleId" => Some(v.clone()),
    _ => None,
  })
}

fn matches(doc: &Document, queries: &[Query]) -> bool {
  queries.iter().all(|q| match q {
    Query::Equal(attr, value) => doc.data.get(attr) == Some(value),
    _ => true,
  })
}

fn sort_key(doc: &Document, attr: &str) -> String {
  doc.data.get(attr).map(|v| v.to_string()).unwrap_or_default()
}

impl DocumentStore for MockBackend {
  fn list_documents<'a>(
    &'a self,
    collection: &'a CollectionRef,
    queries: &'a [Query],
  ) -> impl Future<Output = Result<DocumentList, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      let capsule_id = filtered_capsule(queries);
      state.record("list", &collection.collection_id, capsule_id.clone());
      if capsule_id.is_some_and(|id| state.fail_lists_for.contains(&id)) {
        return Err(BackendError::Transport("list failed".into()));
      }

      let mut docs: Vec<Document> = state
        .docs
        .get(&collection.collection_id)
        .map(|all| all.iter().filter(|d| matches(d, queries)).cloned().collect())
        .unwrap_or_default();
      let total = docs.len() as u64;

      let mut limit = DEFAULT_PAGE_SIZE;
      for q in queries {
        match q {
          Query::OrderAsc(attr) => docs.sort_by_key(|d| sort_key(d, attr)),
          Query::OrderDesc(attr) => {
            docs.sort_by_key(|d| std::cmp::Reverse(sort_key(d, attr)))
          }
          Query::Limit(n) => limit = *n,
          Query::Equal(..) => {}
        }
      }
      docs.truncate(limit);
      Ok(DocumentList { total, documents: docs })
    }
  }

  fn get_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Document>, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("get", &collection.collection_id, None);
      Ok(
        state
          .docs
          .get(&collection.collection_id)
          .and_then(|all| all.iter().find(|d| d.id == id))
          .cloned(),
      )
    }
  }

  fn create_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    data: Map<String, Value>,
  ) -> impl Future<Output = Result<Document, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("create", &collection.collection_id, None);
      if state.fail_creates_in.contains(&collection.collection_id) {
        return Err(BackendError::Rejected("create rejected".into()));
      }
      let id = state.fresh_id("doc");
      let doc = Document::new(id, data);
      state
        .docs
        .entry(collection.collection_id.clone())
        .or_default()
        .push(doc.clone());
      Ok(doc)
    }
  }

  fn update_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
    data: Map<String, Value>,
  ) -> impl Future<Output = Result<Document, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("update", &collection.collection_id, None);
      if state.fail_updates_in.contains(&collection.collection_id) {
        return Err(BackendError::Rejected("update rejected".into()));
      }
      let doc = state
        .docs
        .get_mut(&collection.collection_id)
        .and_then(|all| all.iter_mut().find(|d| d.id == id))
        .ok_or_else(|| BackendError::NotFound(id.to_owned()))?;
      doc.data.extend(data);
      Ok(doc.clone())
    }
  }

  fn delete_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("delete", &collection.collection_id, None);
      if state.fail_deletes_in.contains(&collection.collection_id)
        || state.fail_deletes_of.contains(id)
      {
        return Err(BackendError::Rejected("delete rejected".into()));
      }
      let all = state.docs.entry(collection.collection_id.clone()).or_default();
      let before = all.len();
      all.retain(|d| d.id != id);
      if all.len() == before {
        return Err(BackendError::NotFound(id.to_owned()));
      }
      Ok(())
    }
  }

  fn subscribe<'a>(
    &'a self,
    collection: &'a CollectionRef,
  ) -> impl Future<Output = Result<Subscription, BackendError>> + Send + 'a {
    async move {
      let (tx, rx) = mpsc::channel(16);
      let mut state = self.state();
      state.record("subscribe", &collection.collection_id, None);
      state.listeners.push(tx);
      Ok(rx)
    }
  }
}

impl FileStorage for MockBackend {
  fn create_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    upload: MediaUpload,
  ) -> impl Future<Output = Result<StoredFile, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("upload", &bucket.bucket_id, None);
      if state.fail_uploads {
        return Err(BackendError::Rejected("storage quota exceeded".into()));
      }
      let id = state.fresh_id("file");
      let stored = StoredFile {
        id:        id.clone(),
        name:      upload.file_name.clone(),
        mime_type: upload.content_type.clone(),
        size:      upload.bytes.len() as u64,
      };
      state.files.insert(id, upload);
      Ok(stored)
    }
  }

  fn delete_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("delete_file", &bucket.bucket_id, None);
      if state.fail_file_deletes {
        return Err(BackendError::Transport("storage unreachable".into()));
      }
      state
        .files
        .remove(file_id)
        .map(|_| ())
        .ok_or_else(|| BackendError::NotFound(file_id.to_owned()))
    }
  }

  fn read_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> impl Future<Output = Result<Option<FileContent>, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("read_file", &bucket.bucket_id, None);
      Ok(state.files.get(file_id).map(|f| FileContent {
        content_type: f.content_type.clone(),
        bytes:        f.bytes.clone(),
      }))
    }
  }

  fn file_preview_url(&self, bucket: &BucketRef, file_id: &str) -> String {
    format!("mock://{}/{file_id}/preview", bucket.bucket_id)
  }

  fn file_download_url(&self, bucket: &BucketRef, file_id: &str) -> String {
    format!("mock://{}/{file_id}/download", bucket.bucket_id)
  }
}

impl AccountApi for MockBackend {
  fn get<'a>(
    &'a self,
    secret: &'a str,
  ) -> impl Future<Output = Result<User, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.account_lookups += 1;
      state.record("account.get", "account", None);
      state.sessions.get(secret).cloned().ok_or(BackendError::Unauthorized)
    }
  }

  fn create<'a>(
    &'a self,
    account: &'a NewAccount,
  ) -> impl Future<Output = Result<User, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("account.create", "account", None);
      if state.accounts.iter().any(|(email, ..)| *email == account.email) {
        return Err(BackendError::Rejected("email already registered".into()));
      }
      let user = User {
        id:    state.fresh_id("user"),
        name:  account.name.clone(),
        email: account.email.clone(),
      };
      state
        .accounts
        .push((account.email.clone(), account.password.clone(), user.clone()));
      Ok(user)
    }
  }

  fn create_email_password_session<'a>(
    &'a self,
    credentials: &'a Credentials,
  ) -> impl Future<Output = Result<Session, BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("account.session", "account", None);
      let user = state
        .accounts
        .iter()
        .find(|(email, password, _)| {
          *email == credentials.email && *password == credentials.password
        })
        .map(|(.., user)| user.clone())
        .ok_or(BackendError::Unauthorized)?;
      let secret = state.fresh_id("secret");
      state.sessions.insert(secret.clone(), user.clone());
      Ok(Session {
        id: state.fresh_id("session"),
        user_id: user.id,
        secret,
        expires_at: Utc::now() + Duration::days(365),
      })
    }
  }

  fn delete_session<'a>(
    &'a self,
    secret: &'a str,
  ) -> impl Future<Output = Result<(), BackendError>> + Send + 'a {
    async move {
      let mut state = self.state();
      state.record("account.delete_session", "account", None);
      state
        .sessions
        .remove(secret)
        .map(|_| ())
        .ok_or(BackendError::Unauthorized)
    }
  }
}

pub fn created(collection: &CollectionRef, document: Document) -> DocumentEvent {
  DocumentEvent {
    kind: EventKind::Create,
    collection: collection.clone(),
    document,
  }
}
