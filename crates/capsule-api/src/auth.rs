//! Session extractors.
//!
//! The session secret travels as `Authorization: Bearer <secret>` or in the
//! `X-Capsule-Session` header. Bearer wins when both are present.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use capsule_core::{Error, notify::Mailer, session::User, store::Backend};

use crate::{AppState, error::ApiError};

pub const SESSION_HEADER: &str = "x-capsule-session";

/// The session secret carried by a request, if any.
pub fn session_secret(headers: &HeaderMap) -> Option<&str> {
  let bearer = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "));
  bearer
    .or_else(|| headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()))
    .map(str::trim)
    .filter(|s| !s.is_empty())
}

/// A secret is present; whether it is still live is not checked.
pub struct SessionSecret(pub String);

impl<B, M> FromRequestParts<AppState<B, M>> for SessionSecret
where
  B: Backend,
  M: Mailer + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &AppState<B, M>,
  ) -> Result<Self, Self::Rejection> {
    session_secret(&parts.headers)
      .map(|s| SessionSecret(s.to_owned()))
      .ok_or(ApiError::Core(Error::AuthRequired))
  }
}

/// The signed-in user. Rejects with 401 when there is no live session.
pub struct CurrentUser {
  pub user:   User,
  pub secret: String,
}

impl<B, M> FromRequestParts<AppState<B, M>> for CurrentUser
where
  B: Backend,
  M: Mailer + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<B, M>,
  ) -> Result<Self, Self::Rejection> {
    let secret = session_secret(&parts.headers)
      .ok_or(ApiError::Core(Error::AuthRequired))?
      .to_owned();
    let user = state.sessions.resolve(Some(&secret)).await?;
    Ok(CurrentUser { user, secret })
  }
}

/// The signed-in user, or `None` for anonymous and expired sessions.
pub struct MaybeUser(pub Option<User>);

impl<B, M> FromRequestParts<AppState<B, M>> for MaybeUser
where
  B: Backend,
  M: Mailer + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<B, M>,
  ) -> Result<Self, Self::Rejection> {
    let secret = session_secret(&parts.headers).map(str::to_owned);
    let session = state.sessions.state(secret.as_deref()).await?;
    Ok(MaybeUser(session.user().cloned()))
  }
}
