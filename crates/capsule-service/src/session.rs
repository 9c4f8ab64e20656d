//! Session resolution against the hosted identity API.
//!
//! A secret is looked up at most once per TTL; handlers call
//! [`SessionProvider::resolve`] on every request.

use std::{collections::HashMap, sync::Arc, time::Duration};

use capsule_core::{
  BackendError, Error, Operation, Result,
  session::{Credentials, NewAccount, Session, SessionState, User},
  store::AccountApi,
};
use tokio::{sync::RwLock, time::Instant};

/// Cached lookup outcome; `None` marks a secret the backend rejected.
type Entry = (Instant, Option<User>);

#[derive(Clone)]
pub struct SessionProvider<A> {
  accounts: A,
  cache:    Arc<RwLock<HashMap<String, Entry>>>,
  ttl:      Duration,
}

fn non_blank(secret: Option<&str>) -> Option<&str> {
  secret.map(str::trim).filter(|s| !s.is_empty())
}

impl<A: AccountApi> SessionProvider<A> {
  pub fn new(accounts: A, ttl: Duration) -> Self {
    Self {
      accounts,
      cache: Arc::new(RwLock::new(HashMap::new())),
      ttl,
    }
  }

  /// The user behind `secret`. A missing, blank, expired or revoked secret
  /// is [`Error::AuthRequired`].
  pub async fn resolve(&self, secret: Option<&str>) -> Result<User> {
    let secret = non_blank(secret).ok_or(Error::AuthRequired)?;

    if let Some((at, entry)) = self.cache.read().await.get(secret)
      && at.elapsed() < self.ttl
    {
      return entry.clone().ok_or(Error::AuthRequired);
    }

    match self.accounts.get(secret).await {
      Ok(user) => {
        self.remember(secret, Some(user.clone())).await;
        Ok(user)
      }
      Err(BackendError::Unauthorized) => {
        self.remember(secret, None).await;
        Err(Error::AuthRequired)
      }
      Err(e) => Err(Error::from_backend(e, Operation::Read)),
    }
  }

  /// Like [`resolve`](Self::resolve), but with "no session" as a state
  /// rather than an error.
  pub async fn state(&self, secret: Option<&str>) -> Result<SessionState> {
    match self.resolve(secret).await {
      Ok(user) => Ok(SessionState::Authenticated(user)),
      Err(Error::AuthRequired) => Ok(SessionState::Anonymous),
      Err(e) => Err(e),
    }
  }

  /// What is known about `secret` without a round trip. A secret with no
  /// fresh lookup outcome is [`SessionState::Loading`].
  pub async fn peek(&self, secret: Option<&str>) -> SessionState {
    let Some(secret) = non_blank(secret) else {
      return SessionState::Anonymous;
    };
    match self.cache.read().await.get(secret) {
      Some((at, Some(user))) if at.elapsed() < self.ttl => {
        SessionState::Authenticated(user.clone())
      }
      Some((at, None)) if at.elapsed() < self.ttl => SessionState::Anonymous,
      _ => SessionState::Loading,
    }
  }

  pub async fn sign_in(&self, credentials: &Credentials) -> Result<(Session, User)> {
    credentials.validate()?;
    let session = self
      .accounts
      .create_email_password_session(credentials)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Write))?;
    let user = self.resolve(Some(&session.secret)).await?;
    tracing::info!(user_id = %user.id, "signed in");
    Ok((session, user))
  }

  /// Create an account, then sign in with it.
  pub async fn sign_up(&self, account: &NewAccount) -> Result<(Session, User)> {
    account.credentials().validate()?;
    let created = self
      .accounts
      .create(account)
      .await
      .map_err(|e| Error::from_backend(e, Operation::Write))?;
    tracing::info!(user_id = %created.id, "created account");
    self.sign_in(&account.credentials()).await
  }

  /// End the session. A session the backend no longer knows counts as
  /// already ended.
  pub async fn sign_out(&self, secret: &str) -> Result<()> {
    self.remember(secret, None).await;
    match self.accounts.delete_session(secret).await {
      Ok(()) | Err(BackendError::Unauthorized) => Ok(()),
      Err(e) => Err(Error::from_backend(e, Operation::Write)),
    }
  }

  async fn remember(&self, secret: &str, user: Option<User>) {
    let mut cache = self.cache.write().await;
    let now = Instant::now();
    cache.retain(|_, (at, _)| now.duration_since(*at) < self.ttl);
    cache.insert(secret.to_owned(), (now, user));
  }
}
