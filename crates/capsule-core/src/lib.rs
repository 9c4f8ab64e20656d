//! Core types and trait definitions for Capsule.
//!
//! This crate is deliberately free of HTTP and database dependencies. It
//! holds the data model, the lifecycle evaluator, and the backend ports every
//! other crate is written against.

pub mod capsule;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod session;
pub mod social;
pub mod store;

pub use error::{BackendError, Error, Operation, Result};
