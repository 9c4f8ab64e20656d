//! JSON REST API for Capsule.
//!
//! Exposes an axum [`Router`] over the capsule gateway, the feed aggregator,
//! the live comment overlay and the session provider, for any
//! [`Backend`] and [`Mailer`]. TLS and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", capsule_api::api_router(state))
//! ```

pub mod accounts;
pub mod auth;
pub mod capsules;
pub mod contact;
pub mod error;
pub mod feed;
pub mod media;
pub mod social;

#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use capsule_core::{notify::Mailer, store::Backend};
use capsule_service::{
  CapsuleGateway, FeedAggregator, FeedConfig, GatewayConfig, LiveComments,
  SessionProvider,
};

pub use error::ApiError;

/// Request bodies carry base64 media inline.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<B, M> {
  pub gateway:  CapsuleGateway<B>,
  pub feed:     FeedAggregator<B>,
  pub sessions: SessionProvider<B>,
  pub live:     LiveComments,
  pub mailer:   Arc<M>,
}

// Manual impl: `M` itself need not be `Clone`.
impl<B: Clone, M> Clone for AppState<B, M> {
  fn clone(&self) -> Self {
    Self {
      gateway:  self.gateway.clone(),
      feed:     self.feed.clone(),
      sessions: self.sessions.clone(),
      live:     self.live.clone(),
      mailer:   self.mailer.clone(),
    }
  }
}

impl<B: Backend, M: Mailer> AppState<B, M> {
  pub fn new(
    backend: B,
    gateway: GatewayConfig,
    feed: FeedConfig,
    session_ttl: Duration,
    live: LiveComments,
    mailer: M,
  ) -> Self {
    let gateway = CapsuleGateway::new(backend.clone(), gateway);
    Self {
      feed: FeedAggregator::new(gateway.clone(), feed),
      sessions: SessionProvider::new(backend, session_ttl),
      gateway,
      live,
      mailer: Arc::new(mailer),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<B, M>(state: AppState<B, M>) -> Router<()>
where
  B: Backend,
  M: Mailer + 'static,
{
  Router::new()
    // Accounts
    .route("/account", post(accounts::sign_up::<B, M>))
    .route(
      "/session",
      get(accounts::current::<B, M>)
        .post(accounts::sign_in::<B, M>)
        .delete(accounts::sign_out::<B, M>),
    )
    // Capsules
    .route("/capsules", get(capsules::list::<B, M>).post(capsules::create::<B, M>))
    .route(
      "/capsules/{id}",
      get(capsules::get_one::<B, M>)
        .patch(capsules::update::<B, M>)
        .delete(capsules::remove::<B, M>),
    )
    // Social
    .route("/capsules/{id}/like", post(social::toggle_like::<B, M>))
    .route(
      "/capsules/{id}/comments",
      get(social::list_comments::<B, M>).post(social::create_comment::<B, M>),
    )
    // Feed
    .route("/feed", get(feed::handler::<B, M>))
    .route("/comments/events", get(feed::comment_events::<B, M>))
    // Media
    .route("/media/{file_id}", get(media::handler::<B, M>))
    // Contact
    .route("/send-email", post(contact::send_email::<B, M>))
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .with_state(state)
}
