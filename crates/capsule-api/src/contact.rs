//! `POST /send-email`: forward a contact-form submission to the site owner.
//!
//! Responds `200 {"message"}` on success. Any failure, including an
//! incomplete form, is `{"message", "error", "details"?}` with status 400
//! for invalid input and 500 otherwise.

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use capsule_core::{
  notify::{ContactMessage, Mailer},
  store::Backend,
};
use serde_json::{Value, json};

use crate::AppState;

const SENT: &str = "Email sent successfully";
const FAILED: &str = "Error sending email";

pub async fn send_email<B, M>(
  State(state): State<AppState<B, M>>,
  Json(body): Json<ContactMessage>,
) -> Response
where
  B: Backend,
  M: Mailer + 'static,
{
  if let Err(e) = body.validate() {
    return failure(StatusCode::BAD_REQUEST, e.to_string(), None);
  }

  match state.mailer.send(&body).await {
    Ok(()) => (StatusCode::OK, Json(json!({ "message": SENT }))).into_response(),
    Err(e) => {
      tracing::error!(error = %e, details = ?e.details, "contact notification failed");
      failure(StatusCode::INTERNAL_SERVER_ERROR, e.message, e.details)
    }
  }
}

fn failure(status: StatusCode, error: String, details: Option<Value>) -> Response {
  let mut body = json!({ "message": FAILED, "error": error });
  if let Some(details) = details {
    body["details"] = details;
  }
  (status, Json(body)).into_response()
}
