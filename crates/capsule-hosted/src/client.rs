//! [`HostedBackend`]: the hosted document database, object storage and
//! account API over HTTP.

use std::{sync::Arc, time::Duration};

use capsule_core::{
  BackendError,
  capsule::MediaUpload,
  session::{Credentials, NewAccount, Session, User},
  store::{
    AccountApi, BucketRef, CollectionRef, Document, DocumentList, DocumentStore,
    FileContent, FileStorage, Query, StoredFile, Subscription,
  },
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, multipart};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::{config::HostedConfig, query, realtime};

const PROJECT_HEADER: &str = "X-Appwrite-Project";
const KEY_HEADER: &str = "X-Appwrite-Key";
const SESSION_HEADER: &str = "X-Appwrite-Session";
/// Asks the backend to assign the id.
const UNIQUE_ID: &str = "unique()";

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HostedBackend {
  client: Client,
  config: Arc<HostedConfig>,
}

impl HostedBackend {
  pub fn new(config: HostedConfig) -> Result<Self, BackendError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;
    Ok(Self {
      client,
      config: Arc::new(config),
    })
  }

  pub fn config(&self) -> &HostedConfig { &self.config }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    let req = self
      .client
      .request(method, self.config.url(path))
      .header(PROJECT_HEADER, &self.config.project_id);
    if self.config.api_key.is_empty() {
      req
    } else {
      req.header(KEY_HEADER, &self.config.api_key)
    }
  }

  /// A call made as the user holding `secret` rather than as the server.
  fn as_session(&self, method: Method, path: &str, secret: &str) -> RequestBuilder {
    self
      .client
      .request(method, self.config.url(path))
      .header(PROJECT_HEADER, &self.config.project_id)
      .header(SESSION_HEADER, secret)
  }

  fn documents_path(collection: &CollectionRef) -> String {
    format!(
      "/databases/{}/collections/{}/documents",
      collection.database_id, collection.collection_id
    )
  }

  fn files_path(bucket: &BucketRef) -> String {
    format!("/storage/buckets/{}/files", bucket.bucket_id)
  }
}

// ─── Response handling ───────────────────────────────────────────────────────

async fn send(req: RequestBuilder) -> Result<Response, BackendError> {
  let resp = req
    .send()
    .await
    .map_err(|e| BackendError::Transport(e.to_string()))?;
  if resp.status().is_success() {
    return Ok(resp);
  }
  Err(failure(resp).await)
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, BackendError> {
  send(req)
    .await?
    .json()
    .await
    .map_err(|e| BackendError::Rejected(format!("unexpected response body: {e}")))
}

/// Like [`send_json`], but a 404 is `None`.
async fn send_optional<T: DeserializeOwned>(req: RequestBuilder) -> Result<Option<T>, BackendError> {
  match send_json(req).await {
    Ok(v) => Ok(Some(v)),
    Err(BackendError::NotFound(_)) => Ok(None),
    Err(e) => Err(e),
  }
}

async fn failure(resp: Response) -> BackendError {
  let status = resp.status();
  let body = resp.text().await.unwrap_or_default();
  classify(status, &body)
}

fn classify(status: StatusCode, body: &str) -> BackendError {
  let message = serde_json::from_str::<Value>(body)
    .ok()
    .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
    .unwrap_or_else(|| status.to_string());
  match status {
    StatusCode::UNAUTHORIZED => BackendError::Unauthorized,
    StatusCode::NOT_FOUND => BackendError::NotFound(message),
    _ => BackendError::Rejected(message),
  }
}

// ─── Port impls ──────────────────────────────────────────────────────────────

impl DocumentStore for HostedBackend {
  async fn list_documents<'a>(
    &'a self,
    collection: &'a CollectionRef,
    queries: &'a [Query],
  ) -> Result<DocumentList, BackendError> {
    let req = self
      .request(Method::GET, &Self::documents_path(collection))
      .query(&query::params(queries));
    send_json(req).await
  }

  async fn get_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> Result<Option<Document>, BackendError> {
    let path = format!("{}/{id}", Self::documents_path(collection));
    send_optional(self.request(Method::GET, &path)).await
  }

  async fn create_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    data: Map<String, Value>,
  ) -> Result<Document, BackendError> {
    let req = self
      .request(Method::POST, &Self::documents_path(collection))
      .json(&json!({ "documentId": UNIQUE_ID, "data": data }));
    send_json(req).await
  }

  async fn update_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
    data: Map<String, Value>,
  ) -> Result<Document, BackendError> {
    let path = format!("{}/{id}", Self::documents_path(collection));
    let req = self.request(Method::PATCH, &path).json(&json!({ "data": data }));
    send_json(req).await
  }

  async fn delete_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> Result<(), BackendError> {
    let path = format!("{}/{id}", Self::documents_path(collection));
    send(self.request(Method::DELETE, &path)).await?;
    Ok(())
  }

  async fn subscribe<'a>(
    &'a self,
    collection: &'a CollectionRef,
  ) -> Result<Subscription, BackendError> {
    realtime::subscribe(&self.config, collection)
  }
}

impl FileStorage for HostedBackend {
  async fn create_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    upload: MediaUpload,
  ) -> Result<StoredFile, BackendError> {
    let part = multipart::Part::bytes(upload.bytes.to_vec())
      .file_name(upload.file_name)
      .mime_str(&upload.content_type)
      .map_err(|e| BackendError::Rejected(format!("invalid content type: {e}")))?;
    let form = multipart::Form::new()
      .text("fileId", UNIQUE_ID)
      .part("file", part);
    let req = self
      .request(Method::POST, &Self::files_path(bucket))
      .multipart(form);
    send_json(req).await
  }

  async fn delete_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> Result<(), BackendError> {
    let path = format!("{}/{file_id}", Self::files_path(bucket));
    send(self.request(Method::DELETE, &path)).await?;
    Ok(())
  }

  async fn read_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> Result<Option<FileContent>, BackendError> {
    let path = format!("{}/{file_id}/download", Self::files_path(bucket));
    let resp = match send(self.request(Method::GET, &path)).await {
      Ok(resp) => resp,
      Err(BackendError::NotFound(_)) => return Ok(None),
      Err(e) => return Err(e),
    };
    let content_type = resp
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_owned();
    let bytes = resp
      .bytes()
      .await
      .map_err(|e| BackendError::Transport(e.to_string()))?;
    Ok(Some(FileContent { content_type, bytes }))
  }

  fn file_preview_url(&self, bucket: &BucketRef, file_id: &str) -> String {
    format!(
      "{}/{file_id}/preview?project={}",
      self.config.url(&Self::files_path(bucket)),
      self.config.project_id
    )
  }

  fn file_download_url(&self, bucket: &BucketRef, file_id: &str) -> String {
    format!(
      "{}/{file_id}/download?project={}",
      self.config.url(&Self::files_path(bucket)),
      self.config.project_id
    )
  }
}

impl AccountApi for HostedBackend {
  async fn get<'a>(&'a self, secret: &'a str) -> Result<User, BackendError> {
    send_json(self.as_session(Method::GET, "/account", secret)).await
  }

  async fn create<'a>(&'a self, account: &'a NewAccount) -> Result<User, BackendError> {
    let req = self.request(Method::POST, "/account").json(&json!({
      "userId": UNIQUE_ID,
      "email": account.email,
      "password": account.password,
      "name": account.name,
    }));
    send_json(req).await
  }

  async fn create_email_password_session<'a>(
    &'a self,
    credentials: &'a Credentials,
  ) -> Result<Session, BackendError> {
    let req = self.request(Method::POST, "/account/sessions/email").json(&json!({
      "email": credentials.email,
      "password": credentials.password,
    }));
    send_json(req).await
  }

  async fn delete_session<'a>(&'a self, secret: &'a str) -> Result<(), BackendError> {
    send(self.as_session(Method::DELETE, "/account/sessions/current", secret)).await?;
    Ok(())
  }
}
