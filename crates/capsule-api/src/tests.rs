//! Router tests against an in-memory SQLite backend.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use capsule_core::{
  capsule::NewCapsule,
  notify::{ContactMessage, MailError, Mailer},
  session::User,
  store::{BucketRef, CollectionRef},
};
use capsule_service::{FeedConfig, GatewayConfig, LiveComments};
use capsule_store_sqlite::SqliteBackend;
use chrono::{Duration as Span, Utc};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::{AppState, api_router};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct RecordingMailer {
  sent: Arc<Mutex<Vec<ContactMessage>>>,
  fail: bool,
}

impl Mailer for RecordingMailer {
  async fn send<'a>(&'a self, message: &'a ContactMessage) -> Result<(), MailError> {
    if self.fail {
      return Err(MailError {
        message: "provider refused".into(),
        details: Some(json!({ "errors": [{ "message": "bad sender" }] })),
      });
    }
    self.sent.lock().unwrap().push(message.clone());
    Ok(())
  }
}

type State = AppState<SqliteBackend, RecordingMailer>;

async fn make_state(mailer: RecordingMailer) -> State {
  let backend = SqliteBackend::open_in_memory().await.unwrap();
  let gateway = GatewayConfig {
    capsules: CollectionRef::new("main", "capsules"),
    comments: CollectionRef::new("main", "comments"),
    likes:    CollectionRef::new("main", "likes"),
    bucket:   BucketRef::new("media"),
  };
  let feed = FeedConfig {
    batch_delay_ms: 0,
    ..FeedConfig::default()
  };
  AppState::new(
    backend,
    gateway,
    feed,
    Duration::from_secs(60),
    LiveComments::new(Duration::from_secs(120)),
    mailer,
  )
}

async fn oneshot_raw(
  state: State,
  method: &str,
  uri: &str,
  secret: Option<&str>,
  body: Option<Value>,
) -> axum::response::Response {
  let mut builder = Request::builder().method(method).uri(uri);
  if let Some(secret) = secret {
    builder = builder.header(header::AUTHORIZATION, format!("Bearer {secret}"));
  }
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  api_router(state).oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn call(
  state: &State,
  method: &str,
  uri: &str,
  secret: Option<&str>,
  body: Option<Value>,
) -> (StatusCode, Value) {
  let resp = oneshot_raw(state.clone(), method, uri, secret, body).await;
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

/// Sign up `name` and return their session secret and user.
async fn sign_up(state: &State, name: &str) -> (String, User) {
  let (status, body) = call(
    state,
    "POST",
    "/account",
    None,
    Some(json!({
      "email": format!("{name}@example.com"),
      "password": "correct horse",
      "name": name,
    })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED, "{body}");
  let secret = body["session"]["secret"].as_str().unwrap().to_owned();
  let user = serde_json::from_value(body["user"].clone()).unwrap();
  (secret, user)
}

async fn create(state: &State, secret: &str, body: Value) -> Value {
  let (status, body) = call(state, "POST", "/capsules", Some(secret), Some(body)).await;
  assert_eq!(status, StatusCode::CREATED, "{body}");
  body
}

fn in_days(days: i64) -> String { (Utc::now() + Span::days(days)).to_rfc3339() }

/// A capsule created 13 hours ago, so past its edit window.
async fn aged_capsule(state: &State, owner: &User, public: bool, open_in_days: i64) -> String {
  let mut input = NewCapsule::new(
    "Old letter",
    "written long ago",
    Utc::now() + Span::days(open_in_days),
  );
  input.is_public = Some(public);
  state
    .gateway
    .create_capsule_at(owner, input, Utc::now() - Span::hours(13))
    .await
    .unwrap()
    .id
}

// ─── Sessions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sign_up_current_and_sign_out() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, user) = sign_up(&state, "ada").await;
  assert_eq!(user.name, "ada");

  let (status, me) = call(&state, "GET", "/session", Some(&secret), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(me["$id"], user.id.as_str());

  let resp = api_router(state.clone())
    .oneshot(
      Request::builder()
        .method("DELETE")
        .uri("/session")
        .header("x-capsule-session", &secret)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);

  let (status, body) = call(&state, "GET", "/session", Some(&secret), None).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["error"], "Please sign in to continue.");
}

#[tokio::test]
async fn sign_in_with_wrong_password_is_401() {
  let state = make_state(RecordingMailer::default()).await;
  sign_up(&state, "ada").await;

  let (status, _) = call(
    &state,
    "POST",
    "/session",
    None,
    Some(json!({ "email": "ada@example.com", "password": "nope" })),
  )
  .await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, body) = call(
    &state,
    "POST",
    "/session",
    None,
    Some(json!({ "email": "ada@example.com", "password": "correct horse" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(body["session"]["secret"].as_str().is_some_and(|s| !s.is_empty()));
}

// ─── Capsules ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_requires_a_session() {
  let state = make_state(RecordingMailer::default()).await;
  let (status, _) = call(
    &state,
    "POST",
    "/capsules",
    None,
    Some(json!({ "title": "T", "openDate": in_days(1) })),
  )
  .await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn blank_title_is_400() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, _) = sign_up(&state, "ada").await;
  let (status, body) = call(
    &state,
    "POST",
    "/capsules",
    Some(&secret),
    Some(json!({ "title": "  ", "openDate": in_days(1) })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("title"));
}

#[tokio::test]
async fn create_with_media_then_list_and_fetch() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, user) = sign_up(&state, "ada").await;

  let created = create(
    &state,
    &secret,
    json!({
      "title": "Letters",
      "description": "to future me",
      "openDate": in_days(7),
      "media": {
        "fileName": "photo.png",
        "contentType": "image/png",
        "data": B64.encode(b"\x89PNG-bytes"),
      },
    }),
  )
  .await;
  assert_eq!(created["userId"], user.id.as_str());
  assert_eq!(created["isPublic"], false);
  assert_eq!(created["state"]["editable"], true);
  assert_eq!(created["state"]["openable"], false);
  assert!(created["countdown"].as_str().is_some());
  assert_eq!(created["refreshSecs"], 60);
  assert_eq!(created["sealed"], false);
  let file_id = created["fileId"].as_str().unwrap().to_owned();
  assert!(
    created["media"]["preview"]
      .as_str()
      .unwrap()
      .ends_with(&format!("/media/{file_id}"))
  );

  let (status, mine) = call(&state, "GET", "/capsules", Some(&secret), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(mine.as_array().unwrap().len(), 1);

  let resp = oneshot_raw(state.clone(), "GET", &format!("/media/{file_id}"), None, None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
  assert!(resp.headers().get(header::CONTENT_DISPOSITION).is_none());
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  assert_eq!(&bytes[..], b"\x89PNG-bytes");

  let resp = oneshot_raw(
    state.clone(),
    "GET",
    &format!("/media/{file_id}?download=true"),
    None,
    None,
  )
  .await;
  assert_eq!(resp.headers()[header::CONTENT_DISPOSITION], "attachment");
}

#[tokio::test]
async fn invalid_base64_media_is_400() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, _) = sign_up(&state, "ada").await;
  let (status, _) = call(
    &state,
    "POST",
    "/capsules",
    Some(&secret),
    Some(json!({
      "title": "T",
      "openDate": in_days(1),
      "media": { "fileName": "a.bin", "data": "not base64!" },
    })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_capsules_are_hidden_from_others() {
  let state = make_state(RecordingMailer::default()).await;
  let (ada, _) = sign_up(&state, "ada").await;
  let (bob, _) = sign_up(&state, "bob").await;

  let private = create(&state, &ada, json!({ "title": "Mine", "openDate": in_days(1) })).await;
  create(
    &state,
    &ada,
    json!({ "title": "Ours", "openDate": in_days(1), "isPublic": true }),
  )
  .await;

  let uri = format!("/capsules/{}", private["$id"].as_str().unwrap());
  let (status, _) = call(&state, "GET", &uri, Some(&bob), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = call(&state, "GET", &uri, Some(&ada), None).await;
  assert_eq!(status, StatusCode::OK);

  let (_, public) = call(&state, "GET", "/capsules?scope=public", Some(&bob), None).await;
  let titles: Vec<_> = public.as_array().unwrap().iter().map(|c| c["title"].clone()).collect();
  assert_eq!(titles, [json!("Ours")]);

  let (_, bobs) = call(&state, "GET", "/capsules?scope=mine", Some(&bob), None).await;
  assert!(bobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn locked_capsule_is_sealed_for_everyone_but_the_owner() {
  let state = make_state(RecordingMailer::default()).await;
  let (ada_secret, ada) = sign_up(&state, "ada").await;
  let (bob, _) = sign_up(&state, "bob").await;
  let id = aged_capsule(&state, &ada, true, 2).await;
  let uri = format!("/capsules/{id}");

  let (_, seen) = call(&state, "GET", &uri, Some(&bob), None).await;
  assert_eq!(seen["state"]["locked"], true);
  assert_eq!(seen["sealed"], true);
  assert_eq!(seen["description"], "");

  let (_, own) = call(&state, "GET", &uri, Some(&ada_secret), None).await;
  assert_eq!(own["sealed"], false);
  assert_eq!(own["description"], "written long ago");
}

#[tokio::test]
async fn update_is_owner_only_and_window_bound() {
  let state = make_state(RecordingMailer::default()).await;
  let (ada_secret, ada) = sign_up(&state, "ada").await;
  let (bob, _) = sign_up(&state, "bob").await;

  let fresh = create(&state, &ada_secret, json!({ "title": "Draft", "openDate": in_days(3) })).await;
  let uri = format!("/capsules/{}", fresh["$id"].as_str().unwrap());

  // Someone else's private capsule does not exist as far as bob can tell.
  let (status, _) = call(&state, "PATCH", &uri, Some(&bob), Some(json!({ "title": "Mine now" }))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = call(&state, "DELETE", &uri, Some(&bob), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, updated) = call(
    &state,
    "PATCH",
    &uri,
    Some(&ada_secret),
    Some(json!({ "title": "Final", "isPublic": true })),
  )
  .await;
  assert_eq!(status, StatusCode::OK, "{updated}");
  assert_eq!(updated["title"], "Final");
  assert_eq!(updated["isPublic"], true);
  assert_eq!(updated["editableUntil"], fresh["editableUntil"]);

  let (status, _) = call(&state, "PATCH", &uri, Some(&bob), Some(json!({ "title": "Mine now" }))).await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let old = aged_capsule(&state, &ada, false, 3).await;
  let (status, body) = call(
    &state,
    "PATCH",
    &format!("/capsules/{old}"),
    Some(&ada_secret),
    Some(json!({ "title": "Too late" })),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert!(body["error"].as_str().unwrap().contains("edit window"));
}

#[tokio::test]
async fn delete_returns_report_and_removes_capsule() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, _) = sign_up(&state, "ada").await;
  let created = create(
    &state,
    &secret,
    json!({ "title": "Short lived", "openDate": in_days(1), "isPublic": true }),
  )
  .await;
  let id = created["$id"].as_str().unwrap();
  let uri = format!("/capsules/{id}");

  call(&state, "POST", &format!("{uri}/comments"), Some(&secret), Some(json!({ "text": "first" })))
    .await;
  call(&state, "POST", &format!("{uri}/like"), Some(&secret), None).await;

  let (status, report) = call(&state, "DELETE", &uri, Some(&secret), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(report["capsule_id"], id);
  assert_eq!(report["comments_deleted"], 1);
  assert_eq!(report["likes_deleted"], 1);
  assert_eq!(report["media"], "none");

  let (status, _) = call(&state, "GET", &uri, Some(&secret), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_after_window_is_409() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, ada) = sign_up(&state, "ada").await;
  let id = aged_capsule(&state, &ada, false, 1).await;
  let (status, _) = call(&state, "DELETE", &format!("/capsules/{id}"), Some(&secret), None).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

// ─── Social and feed ──────────────────────────────────────────────────────────

#[tokio::test]
async fn like_toggles_back_and_forth() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, _) = sign_up(&state, "ada").await;
  let created = create(
    &state,
    &secret,
    json!({ "title": "T", "openDate": in_days(1), "isPublic": true }),
  )
  .await;
  let uri = format!("/capsules/{}/like", created["$id"].as_str().unwrap());

  let (_, first) = call(&state, "POST", &uri, Some(&secret), None).await;
  assert_eq!(first["liked"], true);
  let (_, second) = call(&state, "POST", &uri, Some(&secret), None).await;
  assert_eq!(second["liked"], false);
  assert_eq!(second["like"], Value::Null);
}

#[tokio::test]
async fn comments_reach_a_cached_feed_through_the_live_overlay() {
  let state = make_state(RecordingMailer::default()).await;
  let (ada, _) = sign_up(&state, "ada").await;
  let (bob, _) = sign_up(&state, "bob").await;
  let created = create(
    &state,
    &ada,
    json!({ "title": "Hello", "openDate": in_days(1), "isPublic": true }),
  )
  .await;
  let id = created["$id"].as_str().unwrap();

  // Prime the aggregator cache with an empty comment list.
  let (status, feed) = call(&state, "GET", "/feed", Some(&bob), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(feed[0]["comments"], json!([]));

  let (status, comment) = call(
    &state,
    "POST",
    &format!("/capsules/{id}/comments"),
    Some(&bob),
    Some(json!({ "text": "  lovely  " })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(comment["text"], "lovely");
  call(&state, "POST", &format!("/capsules/{id}/like"), Some(&bob), None).await;

  let (_, feed) = call(&state, "GET", "/feed", Some(&bob), None).await;
  assert_eq!(feed[0]["$id"], id);
  assert_eq!(feed[0]["comments"][0]["text"], "lovely");
  // Likes are not pushed; the cached snapshot still has none.
  assert_eq!(feed[0]["likeCount"], 0);

  let (_, listed) = call(&state, "GET", &format!("/capsules/{id}/comments"), None, None).await;
  assert_eq!(listed[0]["userName"], "bob");
}

#[tokio::test]
async fn blank_comment_is_400() {
  let state = make_state(RecordingMailer::default()).await;
  let (secret, _) = sign_up(&state, "ada").await;
  let created = create(
    &state,
    &secret,
    json!({ "title": "T", "openDate": in_days(1), "isPublic": true }),
  )
  .await;
  let (status, _) = call(
    &state,
    "POST",
    &format!("/capsules/{}/comments", created["$id"].as_str().unwrap()),
    Some(&secret),
    Some(json!({ "text": "   " })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn comment_events_are_served_as_sse() {
  let state = make_state(RecordingMailer::default()).await;
  let resp = oneshot_raw(state, "GET", "/comments/events", None, None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
}

// ─── Contact ──────────────────────────────────────────────────────────────────

fn contact() -> Value {
  json!({ "name": "Ada", "email": "ada@example.com", "message": "Hello" })
}

#[tokio::test]
async fn send_email_forwards_the_message() {
  let mailer = RecordingMailer::default();
  let state = make_state(mailer.clone()).await;

  let (status, body) = call(&state, "POST", "/send-email", None, Some(contact())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "message": "Email sent successfully" }));

  let sent = mailer.sent.lock().unwrap();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].email, "ada@example.com");
}

#[tokio::test]
async fn send_email_failure_carries_details() {
  let state = make_state(RecordingMailer {
    fail: true,
    ..Default::default()
  })
  .await;

  let (status, body) = call(&state, "POST", "/send-email", None, Some(contact())).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body["message"], "Error sending email");
  assert_eq!(body["error"], "provider refused");
  assert_eq!(body["details"]["errors"][0]["message"], "bad sender");
}

#[tokio::test]
async fn send_email_rejects_incomplete_forms() {
  let mailer = RecordingMailer::default();
  let state = make_state(mailer.clone()).await;

  let (status, body) = call(
    &state,
    "POST",
    "/send-email",
    None,
    Some(json!({ "name": "Ada", "email": "", "message": "Hi" })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["message"], "Error sending email");
  assert!(mailer.sent.lock().unwrap().is_empty());
}
