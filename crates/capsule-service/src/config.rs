//! Service configuration. Deserialisable so the binary can lift it straight
//! out of its config file.

use std::time::Duration;

use capsule_core::store::{BucketRef, CollectionRef};
use serde::{Deserialize, Serialize};

/// Where the gateway keeps each kind of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
  pub capsules: CollectionRef,
  pub comments: CollectionRef,
  pub likes:    CollectionRef,
  pub bucket:   BucketRef,
}

/// Feed aggregation tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
  /// Capsules fetched concurrently per batch.
  pub batch_size:        usize,
  /// Pause between consecutive batches.
  pub batch_delay_ms:    u64,
  pub cache_ttl_secs:    u64,
  /// Upper bound on comments and on likes fetched per capsule.
  pub per_capsule_limit: usize,
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      batch_size:        5,
      batch_delay_ms:    100,
      cache_ttl_secs:    60,
      per_capsule_limit: 100,
    }
  }
}

impl FeedConfig {
  pub fn batch_delay(&self) -> Duration {
    Duration::from_millis(self.batch_delay_ms)
  }

  pub fn cache_ttl(&self) -> Duration { Duration::from_secs(self.cache_ttl_secs) }
}
