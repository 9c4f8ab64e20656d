//! Feed aggregation: comments and likes for a set of capsules, fetched in
//! paced batches and cached per id set.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
  time::Duration,
};

use capsule_core::{
  social::{self, Comment, Like},
  store::Backend,
};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::{sync::RwLock, time::Instant};

use crate::{config::FeedConfig, gateway::CapsuleGateway};

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Comments and likes keyed by capsule id. Every requested capsule has an
/// entry, empty if its fetch failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
  pub comments: HashMap<String, Vec<Comment>>,
  pub likes:    HashMap<String, Vec<Like>>,
}

impl FeedSnapshot {
  pub fn contains(&self, capsule_id: &str) -> bool {
    self.comments.contains_key(capsule_id)
  }

  /// Newest first.
  pub fn comments_for(&self, capsule_id: &str) -> &[Comment] {
    self.comments.get(capsule_id).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn likes_for(&self, capsule_id: &str) -> &[Like] {
    self.likes.get(capsule_id).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn like_count(&self, capsule_id: &str) -> usize {
    self.likes_for(capsule_id).len()
  }

  pub fn liked_by(&self, capsule_id: &str, user_id: &str) -> bool {
    self.likes_for(capsule_id).iter().any(|l| l.user_id == user_id)
  }

  /// The snapshot with `comment` folded in. A comment already present
  /// (same id) leaves the snapshot unchanged.
  pub fn with_comment(mut self, comment: Comment) -> Self {
    let list = self.comments.entry(comment.capsule_id.clone()).or_default();
    if !list.iter().any(|c| c.id == comment.id) {
      list.push(comment);
      social::sort_newest_first(list);
    }
    self
  }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Process-local snapshot cache with a fixed time to live. Expired entries
/// are pruned whenever a new one is stored.
#[derive(Clone)]
pub struct FeedCache {
  entries: Arc<RwLock<HashMap<String, (Instant, Arc<FeedSnapshot>)>>>,
  ttl:     Duration,
}

impl FeedCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: Arc::new(RwLock::new(HashMap::new())),
      ttl,
    }
  }

  pub async fn get(&self, key: &str) -> Option<Arc<FeedSnapshot>> {
    let entries = self.entries.read().await;
    let (stored_at, snapshot) = entries.get(key)?;
    (stored_at.elapsed() < self.ttl).then(|| snapshot.clone())
  }

  pub async fn insert(&self, key: String, snapshot: Arc<FeedSnapshot>) {
    let mut entries = self.entries.write().await;
    let now = Instant::now();
    entries.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < self.ttl);
    entries.insert(key, (now, snapshot));
  }
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FeedAggregator<B> {
  gateway: CapsuleGateway<B>,
  config:  Arc<FeedConfig>,
  cache:   FeedCache,
}

impl<B: Backend> FeedAggregator<B> {
  pub fn new(gateway: CapsuleGateway<B>, config: FeedConfig) -> Self {
    let cache = FeedCache::new(config.cache_ttl());
    Self {
      gateway,
      config: Arc::new(config),
      cache,
    }
  }

  pub fn config(&self) -> &FeedConfig { &self.config }

  /// Comments and likes for `capsule_ids`.
  ///
  /// Duplicate and blank ids are dropped. A snapshot for the same id set
  /// younger than the cache TTL is returned as is. Otherwise ids are
  /// fetched `batch_size` at a time, each batch concurrently, pausing
  /// `batch_delay` between batches. A capsule whose fetch fails gets empty
  /// lists rather than failing the whole snapshot.
  pub async fn aggregate(&self, capsule_ids: &[String]) -> Arc<FeedSnapshot> {
    let ids = unique_ids(capsule_ids);
    if ids.is_empty() {
      return Arc::new(FeedSnapshot::default());
    }

    let key = cache_key(&ids);
    if let Some(hit) = self.cache.get(&key).await {
      tracing::debug!(capsules = ids.len(), "feed cache hit");
      return hit;
    }

    let mut snapshot = FeedSnapshot::default();
    for (i, batch) in ids.chunks(self.config.batch_size.max(1)).enumerate() {
      if i > 0 {
        tokio::time::sleep(self.config.batch_delay()).await;
      }
      let mut pending = Vec::with_capacity(batch.len());
      for id in batch {
        pending.push(self.fetch_one(id));
      }
      let fetched = join_all(pending).await;
      for (id, (comments, likes)) in batch.iter().zip(fetched) {
        snapshot.comments.insert(id.clone(), comments);
        snapshot.likes.insert(id.clone(), likes);
      }
    }

    tracing::debug!(capsules = ids.len(), "aggregated feed");
    let snapshot = Arc::new(snapshot);
    self.cache.insert(key, snapshot.clone()).await;
    snapshot
  }

  async fn fetch_one(&self, capsule_id: &str) -> (Vec<Comment>, Vec<Like>) {
    let limit = self.config.per_capsule_limit;
    let (comments, likes) = tokio::join!(
      self.gateway.list_comments(capsule_id, limit),
      self.gateway.list_likes(capsule_id, limit),
    );
    match (comments, likes) {
      (Ok(comments), Ok(likes)) => (comments, likes),
      (Err(e), _) | (_, Err(e)) => {
        tracing::warn!(capsule_id, error = %e, "feed fetch failed, using empty lists");
        (Vec::new(), Vec::new())
      }
    }
  }
}

/// First-seen order, without duplicates or blanks.
fn unique_ids(ids: &[String]) -> Vec<String> {
  let mut seen = HashSet::new();
  ids
    .iter()
    .map(|id| id.trim())
    .filter(|id| !id.is_empty() && seen.insert(*id))
    .map(str::to_owned)
    .collect()
}

fn cache_key(ids: &[String]) -> String {
  let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
  sorted.sort_unstable();
  sorted.join(",")
}
