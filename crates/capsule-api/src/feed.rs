//! The public feed and the live comment stream.
//!
//! | Method | Path               | Notes |
//! |--------|--------------------|-------|
//! | `GET`  | `/feed`            | Public capsules with comments and likes |
//! | `GET`  | `/comments/events` | Server-sent `comment` events; optional `?capsuleId=` |

use std::convert::Infallible;

use axum::{
  Json,
  extract::{Query, State},
  response::sse::{Event, KeepAlive, Sse},
};
use capsule_core::{notify::Mailer, social::Comment, store::Backend};
use capsule_service::CapsuleFilter;
use chrono::Utc;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::{
  AppState,
  auth::MaybeUser,
  capsules::{CapsuleView, view},
  error::ApiError,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
  #[serde(flatten)]
  pub capsule:     CapsuleView,
  /// Newest first.
  pub comments:    Vec<Comment>,
  pub like_count:  usize,
  pub liked_by_me: bool,
}

/// `GET /feed`
///
/// Comments and likes come from the aggregator's snapshot, which may be up
/// to a cache TTL old. Comments pushed since are folded in from the live
/// overlay; likes are not.
pub async fn handler<B, M>(
  State(state): State<AppState<B, M>>,
  MaybeUser(viewer): MaybeUser,
) -> Result<Json<Vec<FeedItem>>, ApiError>
where
  B: Backend,
  M: Mailer + 'static,
{
  let capsules = state.gateway.list_capsules(&CapsuleFilter::public()).await?;
  let ids: Vec<String> = capsules.iter().map(|c| c.id.clone()).collect();

  let snapshot = state.feed.aggregate(&ids).await;
  let snapshot = state.live.overlay(&snapshot).await;

  let now = Utc::now();
  let items = capsules
    .into_iter()
    .map(|capsule| {
      let id = capsule.id.clone();
      FeedItem {
        capsule:     view(&state.gateway, capsule, viewer.as_ref(), now),
        comments:    snapshot.comments_for(&id).to_vec(),
        like_count:  snapshot.like_count(&id),
        liked_by_me: viewer.as_ref().is_some_and(|u| snapshot.liked_by(&id, &u.id)),
      }
    })
    .collect();
  Ok(Json(items))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
  pub capsule_id: Option<String>,
}

/// `GET /comments/events[?capsuleId=<id>]`
pub async fn comment_events<B, M>(
  State(state): State<AppState<B, M>>,
  Query(params): Query<EventParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
  B: Backend,
  M: Mailer + 'static,
{
  let listener = state.live.listen();
  let events = stream::unfold(
    (listener, params.capsule_id),
    |(mut listener, only)| async move {
      loop {
        match listener.recv().await {
          Ok(comment) => {
            if only.as_deref().is_some_and(|id| id != comment.capsule_id) {
              continue;
            }
            match Event::default().event("comment").json_data(&comment) {
              Ok(event) => return Some((Ok(event), (listener, only))),
              Err(e) => tracing::warn!(error = %e, "dropping unencodable comment"),
            }
          }
          Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "comment event listener lagged");
          }
          Err(RecvError::Closed) => return None,
        }
      }
    },
  );
  Sse::new(events).keep_alive(KeepAlive::default())
}
