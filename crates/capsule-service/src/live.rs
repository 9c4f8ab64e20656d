//! Live comments: pushed comment events, held briefly and folded into
//! aggregated feed snapshots.
//!
//! Aggregated snapshots are cached and never invalidated by writes, so a
//! comment created after a snapshot was taken only shows up through here.
//! Only comment creations are handled; likes and capsule edits are not
//! pushed.

use std::{collections::HashMap, sync::Arc, time::Duration};

use capsule_core::{
  Error, Operation, Result,
  social::Comment,
  store::{CollectionRef, DocumentStore, EventKind, Subscription},
};
use tokio::{
  sync::{RwLock, broadcast},
  task::JoinHandle,
  time::Instant,
};

use crate::feed::FeedSnapshot;

const LISTENER_CAPACITY: usize = 64;

struct Inner {
  recent:    RwLock<HashMap<String, Vec<(Instant, Comment)>>>,
  retention: Duration,
  events:    broadcast::Sender<Comment>,
}

#[derive(Clone)]
pub struct LiveComments {
  inner: Arc<Inner>,
}

impl LiveComments {
  /// Comments are kept for `retention`; it should outlive the feed cache
  /// TTL so that every cached snapshot can still be patched.
  pub fn new(retention: Duration) -> Self {
    let (events, _) = broadcast::channel(LISTENER_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        recent: RwLock::new(HashMap::new()),
        retention,
        events,
      }),
    }
  }

  /// Subscribe to `collection` and consume its events in the background.
  pub async fn start<S: DocumentStore>(
    &self,
    store: &S,
    collection: &CollectionRef,
  ) -> Result<JoinHandle<()>> {
    let subscription = store
      .subscribe(collection)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Read))?;
    tracing::info!(channel = %collection.channel(), "subscribed to comment events");
    Ok(self.run(subscription))
  }

  /// Consume `subscription` until the backend closes it.
  pub fn run(&self, mut subscription: Subscription) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      while let Some(event) = subscription.recv().await {
        if event.kind != EventKind::Create {
          continue;
        }
        match Comment::from_document(event.document) {
          Ok(comment) => this.record(comment).await,
          Err(e) => tracing::warn!(error = %e, "ignoring undecodable comment event"),
        }
      }
      tracing::info!("comment event stream ended");
    })
  }

  /// Hold `comment` for overlaying and pass it to listeners. A comment
  /// seen twice (pushed and created locally) is kept once.
  pub async fn record(&self, comment: Comment) {
    {
      let mut recent = self.inner.recent.write().await;
      let now = Instant::now();
      let retention = self.inner.retention;
      recent.retain(|_, list| {
        list.retain(|(at, _)| now.duration_since(*at) < retention);
        !list.is_empty()
      });

      let list = recent.entry(comment.capsule_id.clone()).or_default();
      if list.iter().any(|(_, c)| c.id == comment.id) {
        return;
      }
      list.push((now, comment.clone()));
    }
    // No listeners is fine.
    let _ = self.inner.events.send(comment);
  }

  /// `snapshot` with every held comment for its capsules folded in.
  /// Capsules the snapshot does not cover are left out.
  pub async fn overlay(&self, snapshot: &FeedSnapshot) -> FeedSnapshot {
    let recent = self.inner.recent.read().await;
    let now = Instant::now();
    let mut patched = snapshot.clone();
    for (capsule_id, list) in recent.iter() {
      if !snapshot.contains(capsule_id) {
        continue;
      }
      for (at, comment) in list {
        if now.duration_since(*at) < self.inner.retention {
          patched = patched.with_comment(comment.clone());
        }
      }
    }
    patched
  }

  pub fn listen(&self) -> broadcast::Receiver<Comment> { self.inner.events.subscribe() }
}

#[cfg(test)]
mod tests {
  use capsule_core::store::Document;
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  use super::*;
  use crate::testing::{MockBackend, created, gateway_config};

  fn comment_doc(id: &str, capsule: &str, minute: u32) -> Document {
    let value = json!({
      "capsuleId": capsule,
      "text": "pushed",
      "userId": "u2",
      "userName": "Grace",
      "createdAt": Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap().to_rfc3339(),
    });
    let serde_json::Value::Object(map) = value else { unreachable!() };
    Document::new(id, map)
  }

  #[tokio::test]
  async fn pushed_comment_is_overlaid_once() {
    let backend = MockBackend::new();
    let cfg = gateway_config();
    let live = LiveComments::new(Duration::from_secs(120));
    let mut listener = live.listen();
    live.start(&backend, &cfg.comments).await.unwrap();

    let base = FeedSnapshot::default().with_comment(
      Comment::from_document(comment_doc("old", "c1", 0)).unwrap(),
    );

    backend.push(created(&cfg.comments, comment_doc("new", "c1", 9))).await;
    backend.push(created(&cfg.comments, comment_doc("new", "c1", 9))).await;
    backend.push(created(&cfg.comments, comment_doc("other", "c2", 9))).await;

    assert_eq!(listener.recv().await.unwrap().id, "new");
    assert_eq!(listener.recv().await.unwrap().id, "other");

    let patched = live.overlay(&base).await;
    let ids: Vec<_> = patched.comments_for("c1").iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["new", "old"]);
    assert!(!patched.contains("c2"));
    assert_eq!(base.comments_for("c1").len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn held_comments_expire() {
    let live = LiveComments::new(Duration::from_secs(120));
    let comment = Comment::from_document(comment_doc("n", "c1", 0)).unwrap();
    let base = FeedSnapshot::default()
      .with_comment(Comment::from_document(comment_doc("o", "c1", 0)).unwrap());

    live.record(comment).await;
    assert_eq!(live.overlay(&base).await.comments_for("c1").len(), 2);

    tokio::time::advance(Duration::from_secs(121)).await;
    assert_eq!(live.overlay(&base).await.comments_for("c1").len(), 1);
  }

  #[tokio::test]
  async fn non_create_events_are_ignored() {
    let backend = MockBackend::new();
    let cfg = gateway_config();
    let live = LiveComments::new(Duration::from_secs(120));
    let mut listener = live.listen();
    live.start(&backend, &cfg.comments).await.unwrap();

    let mut event = created(&cfg.comments, comment_doc("gone", "c1", 0));
    event.kind = EventKind::Delete;
    backend.push(event).await;
    backend.push(created(&cfg.comments, comment_doc("kept", "c1", 1))).await;

    assert_eq!(listener.recv().await.unwrap().id, "kept");
  }
}
