//! [`SendGridMailer`]: contact notifications through SendGrid's v3 API.

use std::{sync::Arc, time::Duration};

use capsule_core::notify::{
  self, ContactMessage, MailError, Mailer, NOTIFICATION_SUBJECT,
};
use reqwest::Client;
use serde_json::{Value, json};

use crate::config::SendGridConfig;

#[derive(Clone)]
pub struct SendGridMailer {
  client: Client,
  config: Arc<SendGridConfig>,
}

impl SendGridMailer {
  pub fn new(config: SendGridConfig) -> Result<Self, MailError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| MailError::new(format!("failed to build HTTP client: {e}")))?;
    Ok(Self {
      client,
      config: Arc::new(config),
    })
  }

  /// The `/v3/mail/send` request body. Replies go to the submitter.
  fn payload(&self, message: &ContactMessage) -> Value {
    json!({
      "personalizations": [{ "to": [{ "email": self.config.recipient }] }],
      "from": { "email": self.config.sender },
      "reply_to": { "email": message.email },
      "subject": NOTIFICATION_SUBJECT,
      "content": [
        { "type": "text/plain", "value": notify::render_text(message) },
        { "type": "text/html", "value": notify::render_html(message) },
      ],
    })
  }
}

impl Mailer for SendGridMailer {
  async fn send<'a>(&'a self, message: &'a ContactMessage) -> Result<(), MailError> {
    let url = format!("{}/v3/mail/send", self.config.endpoint.trim_end_matches('/'));
    let resp = self
      .client
      .post(url)
      .bearer_auth(&self.config.api_key)
      .json(&self.payload(message))
      .send()
      .await
      .map_err(|e| MailError::new(e.to_string()))?;

    let status = resp.status();
    if status.is_success() {
      tracing::info!(reply_to = %message.email, "sent contact notification");
      return Ok(());
    }

    let body = resp.text().await.unwrap_or_default();
    let details = serde_json::from_str::<Value>(&body)
      .unwrap_or_else(|_| Value::String(body));
    tracing::error!(%status, %details, "SendGrid rejected the message");
    Err(MailError {
      message: format!("SendGrid responded with {status}"),
      details: Some(details),
    })
  }
}
