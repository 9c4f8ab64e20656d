//! Handlers for `/account` and `/session`.
//!
//! | Method   | Path       | Notes |
//! |----------|------------|-------|
//! | `POST`   | `/account` | Sign up and sign in; 201 with the session |
//! | `POST`   | `/session` | Sign in with email and password |
//! | `GET`    | `/session` | The current user; 401 without a live session |
//! | `DELETE` | `/session` | Sign out; 204 |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use capsule_core::{
  notify::Mailer,
  session::{Credentials, NewAccount, Session, User},
  store::Backend,
};
use serde::Serialize;

use crate::{
  AppState,
  auth::{CurrentUser, SessionSecret},
  error::ApiError,
};

/// A fresh session and the user it belongs to. Clients keep `secret` and
/// send it back on every request.
#[derive(Debug, Serialize)]
pub struct SignedIn {
  pub session: Session,
  pub user:    User,
}

/// `POST /account`
pub async fn sign_up<B, M>(
  State(state): State<AppState<B, M>>,
  Json(body): Json<NewAccount>,
) -> Result<impl IntoResponse, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let (session, user) = state.sessions.sign_up(&body).await?;
  Ok((StatusCode::CREATED, Json(SignedIn { session, user })))
}

/// `POST /session`
pub async fn sign_in<B, M>(
  State(state): State<AppState<B, M>>,
  Json(body): Json<Credentials>,
) -> Result<Json<SignedIn>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let (session, user) = state.sessions.sign_in(&body).await?;
  Ok(Json(SignedIn { session, user }))
}

/// `GET /session`
pub async fn current<B, M>(current: CurrentUser) -> Json<User>
where
  B: Backend,
  M: Mailer + 'static,
{
  Json(current.user)
}

/// `DELETE /session`
pub async fn sign_out<B, M>(
  State(state): State<AppState<B, M>>,
  SessionSecret(secret): SessionSecret,
) -> Result<StatusCode, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  state.sessions.sign_out(&secret).await?;
  Ok(StatusCode::NO_CONTENT)
}
