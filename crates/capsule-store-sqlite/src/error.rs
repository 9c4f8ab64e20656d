//! Error type for `capsule-store-sqlite`.

use capsule_core::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("password hashing failed: {0}")]
  PasswordHash(String),

  /// A query named an attribute or value the store cannot express.
  #[error("invalid query: {0}")]
  InvalidQuery(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("conflict: {0}")]
  Conflict(String),
}

impl From<Error> for BackendError {
  fn from(err: Error) -> Self {
    match err {
      Error::NotFound(what) => Self::NotFound(what),
      Error::Unauthorized => Self::Unauthorized,
      other => Self::Rejected(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
