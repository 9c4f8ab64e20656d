//! [`SqliteBackend`]: the SQLite implementation of the backend ports.

use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use capsule_core::{
  BackendError,
  capsule::MediaUpload,
  session::{Credentials, NewAccount, Session, User},
  store::{
    AccountApi, BucketRef, CollectionRef, Document, DocumentEvent, DocumentList,
    DocumentStore, EventKind, FileContent, FileStorage, Query, StoredFile,
    Subscription,
  },
};
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::{
  Error, Result,
  encode::{
    decode_dt, encode_dt, hash_password, hash_secret, list_sql, new_id, new_secret,
    verify_password,
  },
  schema::SCHEMA,
};

const EVENT_CAPACITY: usize = 256;
const SUBSCRIPTION_CAPACITY: usize = 64;

/// Settings that have no home in the database itself.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
  /// Base URL media links are built on, e.g. `http://localhost:8080/api`.
  pub media_base_url: String,
  pub session_ttl:    Duration,
}

impl Default for SqliteOptions {
  fn default() -> Self {
    Self {
      media_base_url: "http://localhost:8080/api".to_owned(),
      session_ttl:    Duration::from_secs(60 * 60 * 24 * 30),
    }
  }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A Capsule backend on a single SQLite file.
///
/// Cloning is cheap; clones share the connection and the event channel.
#[derive(Clone)]
pub struct SqliteBackend {
  conn:    tokio_rusqlite::Connection,
  events:  broadcast::Sender<DocumentEvent>,
  options: Arc<SqliteOptions>,
}

impl SqliteBackend {
  /// Open (or create) a database at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, options: SqliteOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, options).await
  }

  /// Open an in-memory database.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, SqliteOptions::default()).await
  }

  async fn init(conn: tokio_rusqlite::Connection, options: SqliteOptions) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Ok(Self {
      conn,
      events,
      options: Arc::new(options),
    })
  }

  fn publish(&self, kind: EventKind, collection: &CollectionRef, document: &Document) {
    // Nobody listening is fine.
    let _ = self.events.send(DocumentEvent {
      kind,
      collection: collection.clone(),
      document: document.clone(),
    });
  }

  // ── Documents ─────────────────────────────────────────────────────────────

  async fn query_documents(&self, collection: &CollectionRef, queries: &[Query]) -> Result<DocumentList> {
    let sql = list_sql(&collection.collection_id, queries)?;

    let (total, rows): (i64, Vec<(String, String)>) = self
      .conn
      .call(move |conn| {
        let total: i64 = conn.query_row(
          &sql.count,
          rusqlite::params_from_iter(sql.params.iter()),
          |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(&sql.select)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(sql.params.iter()), |r| {
            Ok((r.get(0)?, r.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((total, rows))
      })
      .await?;

    let documents = rows
      .into_iter()
      .map(|(id, data)| decode_document(id, &data))
      .collect::<Result<Vec<_>>>()?;

    Ok(DocumentList {
      total: total.max(0) as u64,
      documents,
    })
  }

  async fn fetch_document(&self, collection: &CollectionRef, id: &str) -> Result<Option<Document>> {
    let collection_id = collection.collection_id.clone();
    let id = id.to_owned();

    let row: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT document_id, data FROM documents
               WHERE collection = ?1 AND document_id = ?2",
              rusqlite::params![collection_id, id],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    row.map(|(id, data)| decode_document(id, &data)).transpose()
  }

  async fn insert_document(&self, collection: &CollectionRef, data: Map<String, Value>) -> Result<Document> {
    let document = Document::new(new_id(), data);
    let collection_id = collection.collection_id.clone();
    let id = document.id.clone();
    let data_str = serde_json::to_string(&document.data)?;
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO documents (collection, document_id, data, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![collection_id, id, data_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.publish(EventKind::Create, collection, &document);
    Ok(document)
  }

  async fn merge_document(
    &self,
    collection: &CollectionRef,
    id: &str,
    patch: Map<String, Value>,
  ) -> Result<Document> {
    let collection_id = collection.collection_id.clone();
    let doc_id = id.to_owned();

    // Read-merge-write inside one transaction.
    let merged: Option<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND document_id = ?2",
            rusqlite::params![collection_id, doc_id],
            |r| r.get(0),
          )
          .optional()?;
        let Some(current) = current else {
          return Ok(None);
        };
        let mut data: Map<String, Value> = match serde_json::from_str(&current) {
          Ok(data) => data,
          Err(e) => return Err(tokio_rusqlite::Error::Other(Box::new(e))),
        };
        data.extend(patch);
        let data_str = match serde_json::to_string(&data) {
          Ok(s) => s,
          Err(e) => return Err(tokio_rusqlite::Error::Other(Box::new(e))),
        };
        tx.execute(
          "UPDATE documents SET data = ?3 WHERE collection = ?1 AND document_id = ?2",
          rusqlite::params![collection_id, doc_id, data_str],
        )?;
        tx.commit()?;
        Ok(Some(data_str))
      })
      .await?;

    let merged = merged.ok_or_else(|| Error::NotFound(format!("document {id}")))?;
    let document = decode_document(id.to_owned(), &merged)?;
    self.publish(EventKind::Update, collection, &document);
    Ok(document)
  }

  async fn remove_document(&self, collection: &CollectionRef, id: &str) -> Result<()> {
    let Some(document) = self.fetch_document(collection, id).await? else {
      return Err(Error::NotFound(format!("document {id}")));
    };
    let collection_id = collection.collection_id.clone();
    let doc_id = id.to_owned();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM documents WHERE collection = ?1 AND document_id = ?2",
          rusqlite::params![collection_id, doc_id],
        )?)
      })
      .await?;
    if removed == 0 {
      return Err(Error::NotFound(format!("document {id}")));
    }

    self.publish(EventKind::Delete, collection, &document);
    Ok(())
  }

  /// Forward events for `collection` until the subscriber goes away.
  fn watch(&self, collection: &CollectionRef) -> Subscription {
    let mut events = self.events.subscribe();
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
    let collection = collection.clone();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = tx.closed() => break,
          received = events.recv() => match received {
            Ok(event) if event.collection == collection => {
              if tx.send(event).await.is_err() {
                break;
              }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
              tracing::warn!(skipped, "subscriber lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
          },
        }
      }
    });

    rx
  }

  // ── Files ─────────────────────────────────────────────────────────────────

  async fn put_file(&self, bucket: &BucketRef, upload: MediaUpload) -> Result<StoredFile> {
    let stored = StoredFile {
      id:        new_id(),
      name:      upload.file_name,
      mime_type: upload.content_type,
      size:      upload.bytes.len() as u64,
    };
    let row = (
      stored.id.clone(),
      bucket.bucket_id.clone(),
      stored.name.clone(),
      stored.mime_type.clone(),
      stored.size as i64,
      upload.bytes.to_vec(),
      encode_dt(Utc::now()),
    );

    self
      .conn
      .call(move |conn| {
        let (id, bucket_id, name, mime, size, content, at) = row;
        conn.execute(
          "INSERT INTO files (file_id, bucket_id, name, mime_type, size, content, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id, bucket_id, name, mime, size, content, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(stored)
  }

  async fn remove_file(&self, bucket: &BucketRef, file_id: &str) -> Result<()> {
    let bucket_id = bucket.bucket_id.clone();
    let id = file_id.to_owned();
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM files WHERE bucket_id = ?1 AND file_id = ?2",
          rusqlite::params![bucket_id, id],
        )?)
      })
      .await?;
    if removed == 0 {
      return Err(Error::NotFound(format!("file {file_id}")));
    }
    Ok(())
  }

  async fn get_file(&self, bucket: &BucketRef, file_id: &str) -> Result<Option<FileContent>> {
    let bucket_id = bucket.bucket_id.clone();
    let id = file_id.to_owned();
    let row: Option<(String, Vec<u8>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT mime_type, content FROM files WHERE bucket_id = ?1 AND file_id = ?2",
              rusqlite::params![bucket_id, id],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(row.map(|(content_type, content)| FileContent {
      content_type,
      bytes: Bytes::from(content),
    }))
  }

  // ── Accounts ──────────────────────────────────────────────────────────────

  async fn user_for_secret(&self, secret: &str) -> Result<User> {
    let digest = hash_secret(secret);
    let row: Option<(String, String, String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT u.user_id, u.name, u.email, s.expires_at
               FROM sessions s JOIN users u ON u.user_id = s.user_id
               WHERE s.secret_hash = ?1",
              rusqlite::params![digest],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?,
        )
      })
      .await?;

    let (id, name, email, expires_at) = row.ok_or(Error::Unauthorized)?;
    if decode_dt(&expires_at)? <= Utc::now() {
      return Err(Error::Unauthorized);
    }
    Ok(User { id, name, email })
  }

  async fn create_user(&self, account: &NewAccount) -> Result<User> {
    let user = User {
      id:    new_id(),
      name:  account.name.trim().to_owned(),
      email: account.email.trim().to_lowercase(),
    };
    let hash = hash_password(&account.password)?;
    let row = (
      user.id.clone(),
      user.email.clone(),
      user.name.clone(),
      hash,
      encode_dt(Utc::now()),
    );

    let inserted = self
      .conn
      .call(move |conn| {
        let (id, email, name, hash, at) = row;
        Ok(conn.execute(
          "INSERT INTO users (user_id, email, name, password_hash, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (email) DO NOTHING",
          rusqlite::params![id, email, name, hash, at],
        )?)
      })
      .await?;
    if inserted == 0 {
      return Err(Error::Conflict(format!("{} is already registered", user.email)));
    }
    Ok(user)
  }

  async fn open_session(&self, credentials: &Credentials) -> Result<Session> {
    let email = credentials.email.trim().to_lowercase();
    let row: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, password_hash FROM users WHERE email = ?1",
              rusqlite::params![email],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    let (user_id, phc) = row.ok_or(Error::Unauthorized)?;
    if !verify_password(&credentials.password, &phc) {
      return Err(Error::Unauthorized);
    }

    let now = Utc::now();
    let ttl = chrono::Duration::from_std(self.options.session_ttl)
      .unwrap_or_else(|_| chrono::Duration::days(30));
    let session = Session {
      id: new_id(),
      user_id,
      secret: new_secret(),
      expires_at: now + ttl,
    };
    let row = (
      session.id.clone(),
      session.user_id.clone(),
      hash_secret(&session.secret),
      encode_dt(session.expires_at),
      encode_dt(now),
    );

    self
      .conn
      .call(move |conn| {
        let (id, user_id, digest, expires, at) = row;
        conn.execute(
          "INSERT INTO sessions (session_id, user_id, secret_hash, expires_at, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id, user_id, digest, expires, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(session)
  }

  async fn close_session(&self, secret: &str) -> Result<()> {
    let digest = hash_secret(secret);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM sessions WHERE secret_hash = ?1",
          rusqlite::params![digest],
        )?)
      })
      .await?;
    if removed == 0 {
      return Err(Error::Unauthorized);
    }
    Ok(())
  }
}

fn decode_document(id: String, data: &str) -> Result<Document> {
  Ok(Document::new(id, serde_json::from_str(data)?))
}

// ─── Port impls ──────────────────────────────────────────────────────────────

impl DocumentStore for SqliteBackend {
  async fn list_documents<'a>(
    &'a self,
    collection: &'a CollectionRef,
    queries: &'a [Query],
  ) -> std::result::Result<DocumentList, BackendError> {
    Ok(self.query_documents(collection, queries).await?)
  }

  async fn get_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> std::result::Result<Option<Document>, BackendError> {
    Ok(self.fetch_document(collection, id).await?)
  }

  async fn create_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    data: Map<String, Value>,
  ) -> std::result::Result<Document, BackendError> {
    Ok(self.insert_document(collection, data).await?)
  }

  async fn update_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
    data: Map<String, Value>,
  ) -> std::result::Result<Document, BackendError> {
    Ok(self.merge_document(collection, id, data).await?)
  }

  async fn delete_document<'a>(
    &'a self,
    collection: &'a CollectionRef,
    id: &'a str,
  ) -> std::result::Result<(), BackendError> {
    Ok(self.remove_document(collection, id).await?)
  }

  async fn subscribe<'a>(
    &'a self,
    collection: &'a CollectionRef,
  ) -> std::result::Result<Subscription, BackendError> {
    Ok(self.watch(collection))
  }
}

impl FileStorage for SqliteBackend {
  async fn create_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    upload: MediaUpload,
  ) -> std::result::Result<StoredFile, BackendError> {
    Ok(self.put_file(bucket, upload).await?)
  }

  async fn delete_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> std::result::Result<(), BackendError> {
    Ok(self.remove_file(bucket, file_id).await?)
  }

  async fn read_file<'a>(
    &'a self,
    bucket: &'a BucketRef,
    file_id: &'a str,
  ) -> std::result::Result<Option<FileContent>, BackendError> {
    Ok(self.get_file(bucket, file_id).await?)
  }

  fn file_preview_url(&self, _bucket: &BucketRef, file_id: &str) -> String {
    format!("{}/media/{file_id}", self.options.media_base_url.trim_end_matches('/'))
  }

  fn file_download_url(&self, _bucket: &BucketRef, file_id: &str) -> String {
    format!(
      "{}/media/{file_id}?download=true",
      self.options.media_base_url.trim_end_matches('/')
    )
  }
}

impl AccountApi for SqliteBackend {
  async fn get<'a>(&'a self, secret: &'a str) -> std::result::Result<User, BackendError> {
    Ok(self.user_for_secret(secret).await?)
  }

  async fn create<'a>(
    &'a self,
    account: &'a NewAccount,
  ) -> std::result::Result<User, BackendError> {
    Ok(self.create_user(account).await?)
  }

  async fn create_email_password_session<'a>(
    &'a self,
    credentials: &'a Credentials,
  ) -> std::result::Result<Session, BackendError> {
    Ok(self.open_session(credentials).await?)
  }

  async fn delete_session<'a>(
    &'a self,
    secret: &'a str,
  ) -> std::result::Result<(), BackendError> {
    Ok(self.close_session(secret).await?)
  }
}
