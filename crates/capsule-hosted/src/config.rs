//! Connection settings for the hosted services.

use serde::{Deserialize, Serialize};

/// The hosted backend project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConfig {
  /// API root, e.g. `https://cloud.appwrite.io/v1`.
  pub endpoint:   String,
  pub project_id: String,
  /// Server API key. Sent with every data call.
  #[serde(default)]
  pub api_key:    String,
}

impl HostedConfig {
  pub(crate) fn url(&self, path: &str) -> String {
    format!("{}{path}", self.endpoint.trim_end_matches('/'))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridConfig {
  pub api_key:   String,
  /// Verified sender address.
  pub sender:    String,
  /// Where contact notifications go.
  pub recipient: String,
  #[serde(default = "default_sendgrid_endpoint")]
  pub endpoint:  String,
}

fn default_sendgrid_endpoint() -> String { "https://api.sendgrid.com".to_owned() }
