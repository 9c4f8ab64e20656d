//! SQLite backend for Capsule.
//!
//! Implements the document store, object storage and account ports from
//! [`capsule_core::store`] on a single SQLite file, for local development
//! and tests. Wraps [`tokio_rusqlite`] so all database access runs on a
//! dedicated thread without blocking the async runtime.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteBackend, SqliteOptions};
