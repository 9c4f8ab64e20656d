//! Clients for the hosted services Capsule runs on: the document database,
//! object storage and identity API of the hosted backend, its realtime
//! channel, and the transactional email provider.

mod client;
mod query;
mod realtime;

pub mod config;
pub mod mail;

pub use client::HostedBackend;
pub use config::{HostedConfig, SendGridConfig};
pub use mail::SendGridMailer;
