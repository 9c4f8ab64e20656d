//! The capsule store gateway: the single place that issues capsule, comment,
//! like and media calls against the backend.
//!
//! Every backend failure leaves through [`Error::from_backend`] tagged with
//! the kind of operation it interrupted, so callers can tell an upload
//! failure from a record write failure.

use std::{collections::HashSet, sync::Arc};

use capsule_core::{
  Error, Operation, Result,
  capsule::{Capsule, CapsulePatch, MediaUpload, NewCapsule},
  session::User,
  social::{self, Comment, Like},
  store::{Backend, CollectionRef, Document, FileContent, Query},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::GatewayConfig;

/// Page size used when sweeping a capsule's comments and likes on delete.
const PURGE_PAGE: usize = 100;

// ─── Filters and reports ─────────────────────────────────────────────────────

/// Selection for [`CapsuleGateway::list_capsules`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapsuleFilter {
  pub owner_id:     Option<String>,
  pub public:       Option<bool>,
  pub newest_first: bool,
  pub limit:        Option<usize>,
}

impl CapsuleFilter {
  /// The "my capsules" listing.
  pub fn owned_by(user_id: impl Into<String>) -> Self {
    Self {
      owner_id: Some(user_id.into()),
      newest_first: true,
      ..Default::default()
    }
  }

  /// The public feed listing.
  pub fn public() -> Self {
    Self {
      public: Some(true),
      newest_first: true,
      ..Default::default()
    }
  }

  fn queries(&self) -> Vec<Query> {
    let mut queries = Vec::new();
    if let Some(owner) = &self.owner_id {
      queries.push(Query::equal("userId", owner.as_str()));
    }
    if let Some(public) = self.public {
      queries.push(Query::equal("isPublic", public));
    }
    if self.newest_first {
      queries.push(Query::order_desc("createdAt"));
    }
    if let Some(limit) = self.limit {
      queries.push(Query::Limit(limit));
    }
    queries
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCleanup {
  /// The capsule had no attached file.
  None,
  Deleted,
  Failed,
}

/// Outcome of a capsule delete.
///
/// The record itself is always gone when a report is returned. The
/// dependent deletes that follow are independent and never rolled back, so
/// a report may carry failures next to successes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
  pub capsule_id:       String,
  pub comments_deleted: usize,
  pub comments_failed:  usize,
  pub likes_deleted:    usize,
  pub likes_failed:     usize,
  pub media:            MediaCleanup,
  pub errors:           Vec<String>,
}

impl DeleteReport {
  fn new(capsule_id: &str) -> Self {
    Self {
      capsule_id:       capsule_id.to_owned(),
      comments_deleted: 0,
      comments_failed:  0,
      likes_deleted:    0,
      likes_failed:     0,
      media:            MediaCleanup::None,
      errors:           Vec::new(),
    }
  }

  /// True when every dependent delete went through.
  pub fn is_complete(&self) -> bool {
    self.comments_failed == 0
      && self.likes_failed == 0
      && self.media != MediaCleanup::Failed
      && self.errors.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaUrls {
  pub preview:  String,
  pub download: String,
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CapsuleGateway<B> {
  backend: B,
  config:  Arc<GatewayConfig>,
}

impl<B: Backend> CapsuleGateway<B> {
  pub fn new(backend: B, config: GatewayConfig) -> Self {
    Self { backend, config: Arc::new(config) }
  }

  pub fn backend(&self) -> &B { &self.backend }

  pub fn config(&self) -> &GatewayConfig { &self.config }

  // ── Capsules ───────────────────────────────────────────────────────────────

  pub async fn create_capsule(
    &self,
    owner: &User,
    input: NewCapsule,
  ) -> Result<Capsule> {
    self.create_capsule_at(owner, input, Utc::now()).await
  }

  /// Create a capsule as of `now`.
  ///
  /// The media upload must finish before the record is written; a failed
  /// upload means no record. If the record write fails after a successful
  /// upload, the uploaded file is deleted again (best-effort).
  pub async fn create_capsule_at(
    &self,
    owner: &User,
    mut input: NewCapsule,
    now: DateTime<Utc>,
  ) -> Result<Capsule> {
    input.validate()?;

    let file_id = match input.file.take() {
      Some(upload) => {
        let stored = self
          .backend
          .create_file(&self.config.bucket, upload)
          .await
          .map_err(|e| Error::from_backend(e, Operation::Upload))?;
        Some(stored.id)
      }
      None => None,
    };

    let fields = input.into_fields(&owner.id, &owner.name, file_id.clone(), now);
    let doc = match self
      .backend
      .create_document(&self.config.capsules, fields)
      .await
    {
      Ok(doc) => doc,
      Err(e) => {
        if let Some(file_id) = &file_id {
          self.discard_media(file_id).await;
        }
        return Err(Error::from_backend(e, Operation::Write));
      }
    };

    let capsule = Capsule::from_document(doc)?;
    tracing::info!(
      capsule_id = %capsule.id,
      owner_id = %owner.id,
      has_media = capsule.file_id.is_some(),
      "created capsule"
    );
    Ok(capsule)
  }

  /// List capsules matching `filter`. Records that fail to decode are
  /// skipped. There is no paging beyond the backend's page size.
  pub async fn list_capsules(&self, filter: &CapsuleFilter) -> Result<Vec<Capsule>> {
    let queries = filter.queries();
    let list = self
      .backend
      .list_documents(&self.config.capsules, &queries)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;
    Ok(decode_all(list.documents, Capsule::from_document))
  }

  pub async fn get_capsule(&self, id: &str) -> Result<Option<Capsule>> {
    let doc = self
      .backend
      .get_document(&self.config.capsules, id)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;
    doc.map(Capsule::from_document).transpose()
  }

  /// Overwrite the given fields. The edit window is not checked here.
  pub async fn update_capsule(&self, id: &str, patch: CapsulePatch) -> Result<Capsule> {
    patch.validate()?;
    if patch.is_empty() {
      return self.require_capsule(id).await;
    }
    let doc = self
      .backend
      .update_document(&self.config.capsules, id, patch.into_fields()?)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Write))?;
    Capsule::from_document(doc)
  }

  /// Swap the capsule's media for `upload`. The superseded file is deleted
  /// best-effort once the record points at the new one.
  pub async fn replace_media(&self, id: &str, upload: MediaUpload) -> Result<Capsule> {
    let current = self.require_capsule(id).await?;

    let stored = self
      .backend
      .create_file(&self.config.bucket, upload)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Upload))?;

    let patch = CapsulePatch {
      file_id: Some(stored.id.clone()),
      ..Default::default()
    };
    let doc = match self
      .backend
      .update_document(&self.config.capsules, id, patch.into_fields()?)
      .await
    {
      Ok(doc) => doc,
      Err(e) => {
        self.discard_media(&stored.id).await;
        return Err(Error::from_backend(e, Operation::Write));
      }
    };

    if let Some(old) = current.file_id.as_deref().filter(|old| *old != stored.id) {
      self.discard_media(old).await;
    }
    Capsule::from_document(doc)
  }

  /// Delete a capsule and everything hanging off it.
  ///
  /// The record goes first; if that fails nothing else is attempted. The
  /// capsule's comments, likes and media are then deleted independently.
  /// Their failures are logged and counted in the report, never rolled
  /// back.
  pub async fn delete_capsule(&self, id: &str) -> Result<DeleteReport> {
    let capsule = self.require_capsule(id).await?;

    self
      .backend
      .delete_document(&self.config.capsules, id)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Write))?;

    let mut report = DeleteReport::new(id);

    let (deleted, failed) =
      self.purge(&self.config.comments, id, &mut report.errors).await;
    report.comments_deleted = deleted;
    report.comments_failed = failed;

    let (deleted, failed) =
      self.purge(&self.config.likes, id, &mut report.errors).await;
    report.likes_deleted = deleted;
    report.likes_failed = failed;

    if let Some(file_id) = &capsule.file_id {
      report.media = match self.backend.delete_file(&self.config.bucket, file_id).await
      {
        Ok(()) => MediaCleanup::Deleted,
        Err(e) => {
          report.errors.push(format!("media {file_id}: {e}"));
          MediaCleanup::Failed
        }
      };
    }

    if report.is_complete() {
      tracing::info!(capsule_id = %id, "deleted capsule");
    } else {
      tracing::warn!(
        capsule_id = %id,
        comments_failed = report.comments_failed,
        likes_failed = report.likes_failed,
        media = ?report.media,
        "deleted capsule with leftovers"
      );
    }
    Ok(report)
  }

  // ── Social ─────────────────────────────────────────────────────────────────

  /// Like the capsule if `user_id` has not, unlike it otherwise. Returns the
  /// new like, or `None` after an unlike.
  ///
  /// The read and the write are separate calls. Two concurrent toggles by
  /// the same user can both see "not liked" and insert two likes; storage
  /// has no uniqueness constraint to stop them.
  pub async fn toggle_like(&self, capsule_id: &str, user_id: &str) -> Result<Option<Like>> {
    let existing = self
      .backend
      .list_documents(&self.config.likes, &[
        Query::equal("capsuleId", capsule_id),
        Query::equal("userId", user_id),
        Query::Limit(1),
      ])
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;

    match existing.documents.into_iter().next() {
      Some(like) => {
        self
          .backend
          .delete_document(&self.config.likes, &like.id)
          .await
          .map_err(|e| Error::from_backend(e, Operation::Write))?;
        Ok(None)
      }
      None => {
        let doc = self
          .backend
          .create_document(&self.config.likes, Like::fields(capsule_id, user_id, Utc::now()))
          .await
          .map_err(|e| Error::from_backend(e, Operation::Write))?;
        Like::from_document(doc).map(Some)
      }
    }
  }

  pub async fn create_comment(
    &self,
    capsule_id: &str,
    author: &User,
    text: &str,
  ) -> Result<Comment> {
    if capsule_id.trim().is_empty() {
      return Err(Error::Validation("capsule id is required".into()));
    }
    let text = social::normalize_comment_text(text)?;
    let fields = Comment::fields(capsule_id, &author.id, &author.name, &text, Utc::now());
    let doc = self
      .backend
      .create_document(&self.config.comments, fields)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Write))?;
    Comment::from_document(doc)
  }

  /// Up to `limit` comments on a capsule, newest first.
  pub async fn list_comments(&self, capsule_id: &str, limit: usize) -> Result<Vec<Comment>> {
    let list = self
      .backend
      .list_documents(&self.config.comments, &per_capsule(capsule_id, limit))
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;
    let mut comments = decode_all(list.documents, Comment::from_document);
    social::sort_newest_first(&mut comments);
    Ok(comments)
  }

  pub async fn list_likes(&self, capsule_id: &str, limit: usize) -> Result<Vec<Like>> {
    let list = self
      .backend
      .list_documents(&self.config.likes, &per_capsule(capsule_id, limit))
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;
    Ok(decode_all(list.documents, Like::from_document))
  }

  // ── Media ──────────────────────────────────────────────────────────────────

  /// Fetchable URLs for the capsule's media, if it has any.
  pub fn media_urls(&self, capsule: &Capsule) -> Option<MediaUrls> {
    let file_id = capsule.file_id.as_deref()?;
    Some(MediaUrls {
      preview:  self.backend.file_preview_url(&self.config.bucket, file_id),
      download: self.backend.file_download_url(&self.config.bucket, file_id),
    })
  }

  pub async fn read_media(&self, file_id: &str) -> Result<Option<FileContent>> {
    self
      .backend
      .read_file(&self.config.bucket, file_id)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))
  }

  // ── Internals ──────────────────────────────────────────────────────────────

  async fn require_capsule(&self, id: &str) -> Result<Capsule> {
    self
      .get_capsule(id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("capsule {id}")))
  }

  async fn discard_media(&self, file_id: &str) {
    if let Err(e) = self.backend.delete_file(&self.config.bucket, file_id).await {
      tracing::warn!(file_id, error = %e, "could not delete media file, leaving it orphaned");
    }
  }

  /// Delete every document in `collection` that belongs to `capsule_id`.
  /// Returns `(deleted, failed)`.
  async fn purge(
    &self,
    collection: &CollectionRef,
    capsule_id: &str,
    errors: &mut Vec<String>,
  ) -> (usize, usize) {
    let mut deleted = 0;
    let mut failed: HashSet<String> = HashSet::new();

    loop {
      // Failed records stay listed; widen the page so they never crowd out
      // records not yet attempted.
      let limit = PURGE_PAGE + failed.len();
      let page = match self
        .backend
        .list_documents(collection, &[
          Query::equal("capsuleId", capsule_id),
          Query::Limit(limit),
        ])
        .await
      {
        Ok(page) => page,
        Err(e) => {
          errors.push(format!("{}: {e}", collection.collection_id));
          break;
        }
      };

      let full = page.documents.len() >= limit;
      let pending: Vec<Document> = page
        .documents
        .into_iter()
        .filter(|d| !failed.contains(&d.id))
        .collect();
      if pending.is_empty() {
        break;
      }

      for doc in pending {
        match self.backend.delete_document(collection, &doc.id).await {
          Ok(()) => deleted += 1,
          Err(e) => {
            errors.push(format!("{} {}: {e}", collection.collection_id, doc.id));
            failed.insert(doc.id);
          }
        }
      }

      if !full {
        break;
      }
    }

    (deleted, failed.len())
  }
}

fn per_capsule(capsule_id: &str, limit: usize) -> [Query; 3] {
  [
    Query::equal("capsuleId", capsule_id),
    Query::order_desc("createdAt"),
    Query::Limit(limit),
  ]
}

fn decode_all<T>(docs: Vec<Document>, decode: impl Fn(Document) -> Result<T>) -> Vec<T> {
  docs
    .into_iter()
    .filter_map(|doc| {
      let id = doc.id.clone();
      match decode(doc) {
        Ok(v) => Some(v),
        Err(e) => {
          tracing::warn!(document_id = %id, error = %e, "skipping malformed document");
          None
        }
      }
    })
    .collect()
}

