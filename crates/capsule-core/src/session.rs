//! Identity types owned by the external session provider.
//!
//! This system never stores users itself; capsules, comments and likes carry
//! a denormalised copy of the id and display name taken at write time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  #[serde(rename = "$id")]
  pub id:    String,
  #[serde(default)]
  pub name:  String,
  #[serde(default)]
  pub email: String,
}

/// A live session. The `secret` authenticates subsequent calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
  #[serde(rename = "$id")]
  pub id:      String,
  pub user_id: String,
  #[serde(default)]
  pub secret:  String,
  #[serde(rename = "expire")]
  pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
  pub email:    String,
  pub password: String,
}

impl Credentials {
  pub fn validate(&self) -> Result<()> {
    if self.email.trim().is_empty() || self.password.is_empty() {
      return Err(Error::Validation("email and password are required".into()));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
  pub email:    String,
  pub password: String,
  #[serde(default)]
  pub name:     String,
}

impl NewAccount {
  pub fn credentials(&self) -> Credentials {
    Credentials {
      email:    self.email.clone(),
      password: self.password.clone(),
    }
  }
}

/// The identity view handed to the rest of the system. `Loading` covers a
/// secret whose lookup has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "user", rename_all = "snake_case")]
pub enum SessionState {
  Loading,
  Anonymous,
  Authenticated(User),
}

impl SessionState {
  pub fn user(&self) -> Option<&User> {
    match self {
      Self::Authenticated(u) => Some(u),
      _ => None,
    }
  }

  pub fn is_loading(&self) -> bool { matches!(self, Self::Loading) }
}
