//! capsule-server binary.
//!
//! Reads `capsule.toml` (or the path given with `--config`), connects to the
//! configured backend, subscribes to pushed comments, and serves the JSON
//! API under `/api`.

mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use axum::Router;
use capsule_api::{AppState, api_router};
use capsule_core::{
  notify::{ContactMessage, MailError, Mailer},
  store::Backend,
};
use capsule_hosted::{HostedBackend, SendGridConfig, SendGridMailer};
use capsule_service::LiveComments;
use capsule_store_sqlite::{SqliteBackend, SqliteOptions};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{BackendKind, ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "Capsule API server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "capsule.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let server_cfg = crate::config::load(::config::File::from(cli.config).required(false), None)
    .context("failed to load configuration")?;

  let notifier = Notifier::new(server_cfg.email.clone())?;

  match server_cfg.backend {
    BackendKind::Hosted => {
      let hosted = server_cfg
        .hosted
        .clone()
        .context("backend = \"hosted\" needs a [hosted] section")?;
      tracing::info!(endpoint = %hosted.endpoint, "using hosted backend");
      let backend = HostedBackend::new(hosted).context("failed to build hosted client")?;
      serve(backend, &server_cfg, notifier).await
    }
    BackendKind::Sqlite => {
      let path = expand_tilde(&server_cfg.sqlite_path);
      tracing::info!(path = %path.display(), "using sqlite backend");
      let options = SqliteOptions {
        media_base_url: server_cfg.api_url(),
        ..SqliteOptions::default()
      };
      let backend = SqliteBackend::open(&path, options)
        .await
        .with_context(|| format!("failed to open store at {path:?}"))?;
      serve(backend, &server_cfg, notifier).await
    }
  }
}

async fn serve<B: Backend>(
  backend: B,
  server_cfg: &ServerConfig,
  notifier: Notifier,
) -> anyhow::Result<()> {
  let gateway = server_cfg.collections.gateway_config();

  // Held comments must outlive any cached feed snapshot they patch.
  let live = LiveComments::new(server_cfg.feed.cache_ttl() * 2);
  let _events = live
    .start(&backend, &gateway.comments)
    .await
    .context("failed to subscribe to comment events")?;

  let state = AppState::new(
    backend,
    gateway,
    server_cfg.feed.clone(),
    Duration::from_secs(server_cfg.session_cache_secs),
    live,
    notifier,
  );

  let app = Router::new()
    .nest("/api", api_router(state))
    .layer(TraceLayer::new_for_http());
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

// ─── Notifications ────────────────────────────────────────────────────────────

/// The configured mailer, or a stand-in that fails every send when no
/// `[email]` section is present.
enum Notifier {
  SendGrid(SendGridMailer),
  Disabled,
}

impl Notifier {
  fn new(config: Option<SendGridConfig>) -> anyhow::Result<Self> {
    match config {
      Some(config) => {
        let mailer = SendGridMailer::new(config).context("failed to build mail client")?;
        Ok(Notifier::SendGrid(mailer))
      }
      None => {
        tracing::warn!("no [email] section; contact notifications are disabled");
        Ok(Notifier::Disabled)
      }
    }
  }
}

impl Mailer for Notifier {
  async fn send<'a>(&'a self, message: &'a ContactMessage) -> Result<(), MailError> {
    match self {
      Notifier::SendGrid(mailer) => mailer.send(message).await,
      Notifier::Disabled => Err(MailError::new("email delivery is not configured")),
    }
  }
}
