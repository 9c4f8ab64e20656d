//! Realtime channel: a websocket per subscription, decoded into
//! [`DocumentEvent`]s and reconnected with capped backoff until the
//! subscriber goes away.

use std::{str::FromStr, time::Duration};

use capsule_core::{
  BackendError,
  store::{CollectionRef, Document, DocumentEvent, EventKind, Subscription},
};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::HostedConfig;

const CHANNEL_CAPACITY: usize = 64;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const HEARTBEAT: Duration = Duration::from_secs(20);
const PING: &str = r#"{"type":"ping"}"#;

pub fn subscribe(
  config: &HostedConfig,
  collection: &CollectionRef,
) -> Result<Subscription, BackendError> {
  let url = realtime_url(config, collection)?;
  let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
  tokio::spawn(run(url, collection.clone(), tx));
  Ok(rx)
}

/// `wss://<host>/<path>/realtime?project=<id>&channels[]=<channel>`.
fn realtime_url(config: &HostedConfig, collection: &CollectionRef) -> Result<Url, BackendError> {
  let mut url = Url::parse(&config.url("/realtime"))
    .map_err(|e| BackendError::Rejected(format!("invalid endpoint: {e}")))?;
  let scheme = match url.scheme() {
    "https" => "wss",
    "http" => "ws",
    other => return Err(BackendError::Rejected(format!("unsupported scheme {other}"))),
  };
  url
    .set_scheme(scheme)
    .map_err(|()| BackendError::Rejected("cannot switch to websocket scheme".into()))?;
  url
    .query_pairs_mut()
    .append_pair("project", &config.project_id)
    .append_pair("channels[]", &collection.channel());
  Ok(url)
}

enum Ended {
  SubscriberGone,
  Disconnected(String),
}

async fn run(url: Url, collection: CollectionRef, tx: mpsc::Sender<DocumentEvent>) {
  let mut backoff = INITIAL_BACKOFF;
  loop {
    match connect_async(url.as_str()).await {
      Ok((socket, _)) => {
        tracing::info!(channel = %collection.channel(), "realtime connected");
        backoff = INITIAL_BACKOFF;
        match pump(socket, &collection, &tx).await {
          Ended::SubscriberGone => break,
          Ended::Disconnected(reason) => {
            tracing::warn!(channel = %collection.channel(), %reason, "realtime disconnected");
          }
        }
      }
      Err(e) => {
        tracing::warn!(channel = %collection.channel(), error = %e, ?backoff, "realtime connect failed");
      }
    }

    tokio::select! {
      _ = tx.closed() => break,
      _ = tokio::time::sleep(backoff) => {}
    }
    backoff = (backoff * 2).min(MAX_BACKOFF);
  }
  tracing::debug!(channel = %collection.channel(), "realtime subscription closed");
}

async fn pump<S>(socket: S, collection: &CollectionRef, tx: &mpsc::Sender<DocumentEvent>) -> Ended
where
  S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
    + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
    + Unpin,
{
  let (mut write, mut read) = socket.split();
  let mut heartbeat = tokio::time::interval(HEARTBEAT);

  loop {
    tokio::select! {
      _ = tx.closed() => return Ended::SubscriberGone,
      _ = heartbeat.tick() => {
        if let Err(e) = write.send(Message::Text(PING.into())).await {
          return Ended::Disconnected(e.to_string());
        }
      }
      frame = read.next() => match frame {
        Some(Ok(Message::Text(text))) => {
          if let Some(event) = parse_event(&text, collection) {
            if tx.send(event).await.is_err() {
              return Ended::SubscriberGone;
            }
          }
        }
        Some(Ok(Message::Close(_))) | None => {
          return Ended::Disconnected("closed by server".into());
        }
        Some(Ok(_)) => {}
        Some(Err(e)) => return Ended::Disconnected(e.to_string()),
      },
    }
  }
}

// ─── Frames ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Frame {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  data: Option<FrameData>,
}

#[derive(Deserialize)]
struct FrameData {
  #[serde(default)]
  events:  Vec<String>,
  #[serde(default)]
  payload: Value,
}

/// Decode a realtime frame into an event on `collection`. Anything else
/// (connection acks, pongs, errors, other channels) yields `None`.
fn parse_event(text: &str, collection: &CollectionRef) -> Option<DocumentEvent> {
  let frame: Frame = serde_json::from_str(text).ok()?;
  if frame.kind != "event" {
    if frame.kind == "error" {
      tracing::warn!(frame = %text, "realtime error frame");
    }
    return None;
  }
  let data = frame.data?;

  let channel = collection.channel();
  let kind = data.events.iter().find_map(|event| {
    let rest = event.strip_prefix(&channel)?;
    let suffix = rest.rsplit('.').next()?;
    EventKind::from_str(suffix).ok()
  })?;

  let document: Document = serde_json::from_value(data.payload).ok()?;
  Some(DocumentEvent {
    kind,
    collection: collection.clone(),
    document,
  })
}
