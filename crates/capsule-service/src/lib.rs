//! Application services for Capsule.
//!
//! Everything here is written against the backend ports in
//! [`capsule_core::store`]; wiring a concrete backend is the binary's job.
//!
//! - [`gateway::CapsuleGateway`] is the only code that talks to the backend
//!   about capsules, comments, likes and media.
//! - [`feed::FeedAggregator`] enriches a set of capsules with their comments
//!   and likes, batched and cached.
//! - [`live::LiveComments`] folds pushed comment events into aggregated
//!   snapshots.
//! - [`session::SessionProvider`] resolves session secrets to users.

pub mod config;
pub mod feed;
pub mod gateway;
pub mod live;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{FeedConfig, GatewayConfig};
pub use feed::{FeedAggregator, FeedSnapshot};
pub use gateway::{CapsuleFilter, CapsuleGateway, DeleteReport, MediaCleanup};
pub use live::LiveComments;
pub use session::SessionProvider;
