//! Handlers for `/capsules` endpoints.
//!
//! | Method   | Path             | Notes |
//! |----------|------------------|-------|
//! | `GET`    | `/capsules`      | Optional `?scope=mine\|public` (default `mine`) |
//! | `POST`   | `/capsules`      | Body: title, description, openDate, isPublic?, media? |
//! | `GET`    | `/capsules/{id}` | 404 if missing, or private and not yours |
//! | `PATCH`  | `/capsules/{id}` | Owner only, inside the edit window |
//! | `DELETE` | `/capsules/{id}` | Owner only, inside the edit window; returns the report |
//!
//! Every capsule is returned with its lifecycle state at request time. A
//! capsule the caller may not open yet is `sealed`: its description and
//! media are withheld.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use capsule_core::{
  Error,
  capsule::{Capsule, CapsulePatch, MediaUpload, NewCapsule},
  lifecycle::{CapsuleState, REFRESH_INTERVAL},
  notify::Mailer,
  session::User,
  store::Backend,
};
use capsule_service::{CapsuleFilter, CapsuleGateway, DeleteReport, gateway::MediaUrls};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  AppState,
  auth::{CurrentUser, MaybeUser},
  error::ApiError,
};

// ─── View ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleView {
  #[serde(flatten)]
  pub capsule:      Capsule,
  pub state:        CapsuleState,
  /// `"{d}d {h}h {m}m"` until the open date.
  pub countdown:    Option<String>,
  pub sealed:       bool,
  pub media:        Option<MediaUrls>,
  /// Seconds after which `state` and `countdown` are stale.
  pub refresh_secs: u64,
}

/// Render `capsule` for `viewer` as of `now`. Owners always see everything.
pub(crate) fn view<B: Backend>(
  gateway: &CapsuleGateway<B>,
  mut capsule: Capsule,
  viewer: Option<&User>,
  now: DateTime<Utc>,
) -> CapsuleView {
  let state = capsule.state_at(now);
  let owner = viewer.is_some_and(|u| capsule.is_owned_by(&u.id));
  let sealed = !owner && !state.is_viewable(capsule.is_public);

  let media = if sealed { None } else { gateway.media_urls(&capsule) };
  if sealed {
    capsule.description.clear();
    capsule.file_id = None;
  }
  CapsuleView {
    countdown: state.time_remaining.map(|t| t.to_string()),
    capsule,
    state,
    sealed,
    media,
    refresh_secs: REFRESH_INTERVAL.as_secs(),
  }
}

/// Inline media, base64-encoded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBody {
  pub file_name:    String,
  #[serde(default = "default_content_type")]
  pub content_type: String,
  pub data:         String,
}

fn default_content_type() -> String { "application/octet-stream".to_owned() }

impl MediaBody {
  fn decode(self) -> Result<MediaUpload, ApiError> {
    let bytes = B64
      .decode(self.data.trim())
      .map_err(|e| ApiError::BadRequest(format!("media is not valid base64: {e}")))?;
    if bytes.is_empty() {
      return Err(ApiError::BadRequest("media is empty".into()));
    }
    Ok(MediaUpload {
      file_name:    self.file_name,
      content_type: self.content_type,
      bytes:        bytes.into(),
    })
  }
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
  #[default]
  Mine,
  Public,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub scope: Scope,
}

/// `GET /capsules[?scope=mine|public]`, newest first.
pub async fn list<B, M>(
  State(state): State<AppState<B, M>>,
  MaybeUser(viewer): MaybeUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<CapsuleView>>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let filter = match params.scope {
    Scope::Mine => {
      let user = viewer.as_ref().ok_or(Error::AuthRequired)?;
      CapsuleFilter::owned_by(user.id.clone())
    }
    Scope::Public => CapsuleFilter::public(),
  };
  let capsules = state.gateway.list_capsules(&filter).await?;

  let now = Utc::now();
  let views = capsules
    .into_iter()
    .map(|c| view(&state.gateway, c, viewer.as_ref(), now))
    .collect();
  Ok(Json(views))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub title:       String,
  #[serde(default)]
  pub description: String,
  pub open_date:   DateTime<Utc>,
  #[serde(default)]
  pub is_public:   Option<bool>,
  #[serde(default)]
  pub media:       Option<MediaBody>,
}

/// `POST /capsules`
pub async fn create<B, M>(
  State(state): State<AppState<B, M>>,
  CurrentUser { user, .. }: CurrentUser,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let mut input = NewCapsule::new(body.title, body.description, body.open_date);
  input.is_public = body.is_public;
  input.file = body.media.map(MediaBody::decode).transpose()?;

  let capsule = state.gateway.create_capsule(&user, input).await?;
  let view = view(&state.gateway, capsule, Some(&user), Utc::now());
  Ok((StatusCode::CREATED, Json(view)))
}

// ─── Get ──────────────────────────────────────────────────────────────────────

/// `GET /capsules/{id}`
pub async fn get_one<B, M>(
  State(state): State<AppState<B, M>>,
  MaybeUser(viewer): MaybeUser,
  Path(id): Path<String>,
) -> Result<Json<CapsuleView>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let capsule = visible_to(&state.gateway, &id, viewer.as_ref()).await?;
  Ok(Json(view(&state.gateway, capsule, viewer.as_ref(), Utc::now())))
}

/// The capsule `id` if it is public or owned by `viewer`. A private capsule
/// someone else owns is reported as missing.
pub(crate) async fn visible_to<B: Backend>(
  gateway: &CapsuleGateway<B>,
  id: &str,
  viewer: Option<&User>,
) -> Result<Capsule, ApiError> {
  gateway
    .get_capsule(id)
    .await?
    .filter(|c| c.is_public || viewer.is_some_and(|u| c.is_owned_by(&u.id)))
    .ok_or_else(|| ApiError::NotFound(format!("capsule {id}")))
}

// ─── Update ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchBody {
  #[serde(default)]
  pub title:       Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub open_date:   Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_public:   Option<bool>,
  /// Replaces the attached media.
  #[serde(default)]
  pub media:       Option<MediaBody>,
}

/// `PATCH /capsules/{id}`
pub async fn update<B, M>(
  State(state): State<AppState<B, M>>,
  CurrentUser { user, .. }: CurrentUser,
  Path(id): Path<String>,
  Json(body): Json<PatchBody>,
) -> Result<Json<CapsuleView>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  editable_by(&state.gateway, &id, &user).await?;

  let patch = CapsulePatch {
    title:       body.title,
    description: body.description,
    open_date:   body.open_date,
    is_public:   body.is_public,
    file_id:     None,
  };
  patch.validate()?;
  let upload = body.media.map(MediaBody::decode).transpose()?;

  if let Some(upload) = upload {
    state.gateway.replace_media(&id, upload).await?;
  }
  let capsule = state.gateway.update_capsule(&id, patch).await?;
  tracing::info!(capsule_id = %id, user_id = %user.id, "updated capsule");
  Ok(Json(view(&state.gateway, capsule, Some(&user), Utc::now())))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /capsules/{id}`
pub async fn remove<B, M>(
  State(state): State<AppState<B, M>>,
  CurrentUser { user, .. }: CurrentUser,
  Path(id): Path<String>,
) -> Result<Json<DeleteReport>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  editable_by(&state.gateway, &id, &user).await?;
  let report = state.gateway.delete_capsule(&id).await?;
  Ok(Json(report))
}

/// The capsule `id`, if `user` owns it and its edit window is still open.
async fn editable_by<B: Backend>(
  gateway: &CapsuleGateway<B>,
  id: &str,
  user: &User,
) -> Result<Capsule, ApiError> {
  let capsule = visible_to(gateway, id, Some(user)).await?;
  if !capsule.is_owned_by(&user.id) {
    return Err(ApiError::Forbidden("only the owner may change a capsule".into()));
  }
  if !capsule.state_at(Utc::now()).editable {
    return Err(ApiError::Conflict(format!(
      "capsule {id} can no longer be changed; its edit window closed at {}",
      capsule.editable_until.to_rfc3339()
    )));
  }
  Ok(capsule)
}
