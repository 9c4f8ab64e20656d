//! Handlers for likes and comments on a capsule.
//!
//! | Method | Path                      | Notes |
//! |--------|---------------------------|-------|
//! | `POST` | `/capsules/{id}/like`     | Toggle; returns the new like state |
//! | `GET`  | `/capsules/{id}/comments` | Newest first |
//! | `POST` | `/capsules/{id}/comments` | Body: `{"text":"..."}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use capsule_core::{
  notify::Mailer,
  social::{Comment, Like},
  store::Backend,
};
use serde::{Deserialize, Serialize};

use crate::{
  AppState,
  auth::{CurrentUser, MaybeUser},
  capsules::visible_to,
  error::ApiError,
};

#[derive(Debug, Serialize)]
pub struct LikeToggled {
  pub liked: bool,
  pub like:  Option<Like>,
}

/// `POST /capsules/{id}/like`
pub async fn toggle_like<B, M>(
  State(state): State<AppState<B, M>>,
  CurrentUser { user, .. }: CurrentUser,
  Path(id): Path<String>,
) -> Result<Json<LikeToggled>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  visible_to(&state.gateway, &id, Some(&user)).await?;
  let like = state.gateway.toggle_like(&id, &user.id).await?;
  tracing::debug!(capsule_id = %id, user_id = %user.id, liked = like.is_some(), "toggled like");
  Ok(Json(LikeToggled { liked: like.is_some(), like }))
}

/// `GET /capsules/{id}/comments`
pub async fn list_comments<B, M>(
  State(state): State<AppState<B, M>>,
  MaybeUser(viewer): MaybeUser,
  Path(id): Path<String>,
) -> Result<Json<Vec<Comment>>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  visible_to(&state.gateway, &id, viewer.as_ref()).await?;
  let limit = state.feed.config().per_capsule_limit;
  let comments = state.gateway.list_comments(&id, limit).await?;
  Ok(Json(comments))
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
  pub text: String,
}

/// `POST /capsules/{id}/comments`
///
/// The new comment is also recorded with the live overlay, so feeds served
/// from a cached snapshot show it straight away.
pub async fn create_comment<B, M>(
  State(state): State<AppState<B, M>>,
  CurrentUser { user, .. }: CurrentUser,
  Path(id): Path<String>,
  Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  visible_to(&state.gateway, &id, Some(&user)).await?;
  let comment = state.gateway.create_comment(&id, &user, &body.text).await?;
  state.live.record(comment.clone()).await;
  Ok((StatusCode::CREATED, Json(comment)))
}
