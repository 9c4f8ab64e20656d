//! `GET /media/{file_id}`: capsule media proxied from object storage.
//!
//! With `?download=true` the response asks the client to save the file
//! rather than display it.

use axum::{
  extract::{Path, Query, State},
  http::{HeaderValue, header},
  response::{IntoResponse, Response},
};
use capsule_core::{notify::Mailer, store::Backend};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct MediaParams {
  #[serde(default)]
  pub download: bool,
}

pub async fn handler<B, M>(
  State(state): State<AppState<B, M>>,
  Path(file_id): Path<String>,
  Query(params): Query<MediaParams>,
) -> Result<Response, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let content = state
    .gateway
    .read_media(&file_id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("file {file_id}")))?;

  let content_type = HeaderValue::from_str(&content.content_type)
    .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
  let mut resp = ([(header::CONTENT_TYPE, content_type)], content.bytes).into_response();
  if params.download {
    resp
      .headers_mut()
      .insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
  }
  Ok(resp)
}
