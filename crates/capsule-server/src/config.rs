//! Server configuration, deserialised from `capsule.toml` and `CAPSULE_*`
//! environment variables.

use std::path::{Path, PathBuf};

use capsule_core::store::{BucketRef, CollectionRef};
use capsule_hosted::{HostedConfig, SendGridConfig};
use capsule_service::{FeedConfig, GatewayConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  #[default]
  Hosted,
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  /// Externally visible origin; media links are built on it.
  pub public_url:         String,
  #[serde(default)]
  pub backend:            BackendKind,
  #[serde(default = "default_sqlite_path")]
  pub sqlite_path:        PathBuf,
  /// Required when `backend = "hosted"`.
  #[serde(default)]
  pub hosted:             Option<HostedConfig>,
  pub collections:        Collections,
  #[serde(default)]
  pub email:              Option<SendGridConfig>,
  #[serde(default)]
  pub feed:               FeedConfig,
  #[serde(default = "default_session_cache_secs")]
  pub session_cache_secs: u64,
}

fn default_sqlite_path() -> PathBuf { PathBuf::from("capsule.db") }

fn default_session_cache_secs() -> u64 { 60 }

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// Where `/api` is reachable from outside.
  pub fn api_url(&self) -> String {
    format!("{}/api", self.public_url.trim_end_matches('/'))
  }
}

/// Database, collection and bucket ids.
#[derive(Debug, Clone, Deserialize)]
pub struct Collections {
  pub database_id: String,
  pub capsules:    String,
  pub comments:    String,
  pub likes:       String,
  pub bucket_id:   String,
}

impl Collections {
  pub fn gateway_config(&self) -> GatewayConfig {
    GatewayConfig {
      capsules: CollectionRef::new(&self.database_id, &self.capsules),
      comments: CollectionRef::new(&self.database_id, &self.comments),
      likes:    CollectionRef::new(&self.database_id, &self.likes),
      bucket:   BucketRef::new(&self.bucket_id),
    }
  }
}

/// Build a [`ServerConfig`] from `file` layered under `CAPSULE_*`
/// variables, with `__` between nested keys (`CAPSULE_HOSTED__API_KEY`).
/// `env` replaces the process environment when given.
pub fn load(
  file: impl ::config::Source + Send + Sync + 'static,
  env: Option<::config::Map<String, String>>,
) -> Result<ServerConfig, ::config::ConfigError> {
  ::config::Config::builder()
    .add_source(file)
    .add_source(
      ::config::Environment::with_prefix("CAPSULE")
        .prefix_separator("_")
        .separator("__")
        .source(env),
    )
    .build()?
    .try_deserialize()
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
