//! Error types for `capsule-core`.
//!
//! [`BackendError`] is what a backend port reports; [`Error`] is the taxonomy
//! callers of the gateway see. The two are kept apart so that one backend
//! failure can mean "upload failed" for one operation and "write failed" for
//! another.

use thiserror::Error;

// ─── Backend failures ────────────────────────────────────────────────────────

/// A failure reported by a backend port (document store, object storage or
/// session API).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
  /// The session is absent, expired, or not allowed to perform the call.
  #[error("unauthorized")]
  Unauthorized,

  #[error("not found: {0}")]
  NotFound(String),

  /// The request never produced a response (connection refused, timeout…).
  #[error("transport error: {0}")]
  Transport(String),

  /// The backend answered and refused the operation.
  #[error("rejected: {0}")]
  Rejected(String),
}

// ─── Gateway taxonomy ────────────────────────────────────────────────────────

/// Which kind of operation a backend failure happened in. Decides the
/// [`Error`] variant a non-auth, non-transport failure maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Read,
  Write,
  Upload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// No live session; callers redirect to authentication.
  #[error("authentication required")]
  AuthRequired,

  /// Transport failure. Retryable by re-triggering the action.
  #[error("network error: {0}")]
  Network(String),

  /// A required field was empty; raised before anything is dispatched.
  #[error("invalid input: {0}")]
  Validation(String),

  #[error("media upload failed: {0}")]
  Upload(String),

  #[error("write failed: {0}")]
  Write(String),

  #[error("read failed: {0}")]
  Read(String),

  #[error("not found: {0}")]
  NotFound(String),

  /// A stored document could not be decoded into its typed record.
  #[error("malformed record: {0}")]
  Decode(String),
}

impl Error {
  /// Map a backend failure that occurred during `op`.
  pub fn from_backend(err: BackendError, op: Operation) -> Self {
    match err {
      BackendError::Unauthorized => Self::AuthRequired,
      BackendError::Transport(m) => Self::Network(m),
      BackendError::NotFound(m) if op != Operation::Upload => Self::NotFound(m),
      BackendError::NotFound(m) | BackendError::Rejected(m) => match op {
        Operation::Read => Self::Read(m),
        Operation::Write => Self::Write(m),
        Operation::Upload => Self::Upload(m),
      },
    }
  }

  /// The message shown to a user in an inline error banner.
  pub fn user_message(&self) -> String {
    match self {
      Self::AuthRequired => "Please sign in to continue.".to_owned(),
      Self::Network(_) => {
        "Could not reach the server. Please try again.".to_owned()
      }
      other => other.to_string(),
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self { Self::Decode(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
