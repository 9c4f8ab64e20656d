//! Outbound notification email: the message shape, the mailer port, and
//! the rendered bodies.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Error, Result};

pub const NOTIFICATION_SUBJECT: &str = "New Contact Form Submission";

/// A contact-form submission to be forwarded by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
  pub name:    String,
  pub email:   String,
  pub message: String,
}

impl ContactMessage {
  pub fn validate(&self) -> Result<()> {
    for (field, value) in
      [("name", &self.name), ("email", &self.email), ("message", &self.message)]
    {
      if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
      }
    }
    Ok(())
  }
}

/// A delivery failure, with the provider's diagnostics when it gave any.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MailError {
  pub message: String,
  pub details: Option<serde_json::Value>,
}

impl MailError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), details: None }
  }
}

/// A transactional email provider.
pub trait Mailer: Send + Sync {
  fn send<'a>(
    &'a self,
    message: &'a ContactMessage,
  ) -> impl Future<Output = Result<(), MailError>> + Send + 'a;
}

// ─── Rendering ───────────────────────────────────────────────────────────────

pub fn render_text(msg: &ContactMessage) -> String {
  format!(
    "Name: {}\nEmail: {}\nMessage: {}",
    msg.name, msg.email, msg.message
  )
}

pub fn render_html(msg: &ContactMessage) -> String {
  let name = escape_html(&msg.name);
  let email = escape_html(&msg.email);
  let message = escape_html(&msg.message);
  format!(
    r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{NOTIFICATION_SUBJECT}</title>
  <style>
    body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px; }}
    .container {{ background-color: #f9f9f9; border-radius: 5px; padding: 20px; box-shadow: 0 2px 5px rgba(0,0,0,0.1); }}
    h1 {{ color: #2c3e50; border-bottom: 2px solid #3498db; padding-bottom: 10px; }}
    .field {{ margin-bottom: 20px; }}
    .field strong {{ color: #2980b9; }}
    .message {{ background-color: #ffffff; border-left: 4px solid #3498db; padding: 10px; margin-top: 10px; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>{NOTIFICATION_SUBJECT}</h1>
    <div class="field"><strong>Name:</strong> {name}</div>
    <div class="field"><strong>Email:</strong> {email}</div>
    <div class="field">
      <strong>Message:</strong>
      <div class="message">{message}</div>
    </div>
  </div>
</body>
</html>
"#
  )
}

fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}
