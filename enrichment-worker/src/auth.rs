//! Access tokens for the identity API.
//!
//! The `Authenticator` is the only owner of the process-wide token. Concurrent callers share a
//! single exchange: the cache lock is held while credentials are being exchanged, so callers that
//! arrive during an exchange wait for its result instead of starting their own.
use std::fmt;
use std::time;

use async_trait::async_trait;
use enrichment_common::retry::RetryPolicy;
use http::StatusCode;
use serde_derive::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use crate::client::parse_retry_after_header;
use crate::error::AuthError;

/// Username and password used to obtain access tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bearer token and the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_at: Instant,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token can still be handed out at `now`, keeping `margin` before expiry.
    pub fn is_usable(&self, now: Instant, margin: time::Duration) -> bool {
        now.checked_add(margin)
            .map_or(false, |deadline| deadline < self.expires_at)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that hands out access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return the cached token while it is usable, exchanging credentials otherwise.
    async fn token(&self) -> Result<AuthToken, AuthError>;

    /// Replace `stale`, a token the identity API has just rejected. If another caller already
    /// replaced it, the replacement is returned without a new exchange.
    async fn refresh(&self, stale: &AuthToken) -> Result<AuthToken, AuthError>;
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    jwt: String,
}

pub struct Authenticator {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
    lifetime: time::Duration,
    refresh_margin: time::Duration,
    retry_policy: RetryPolicy,
    cached: Mutex<Option<AuthToken>>,
}

impl Authenticator {
    pub fn new(
        client: reqwest::Client,
        base_url: &Url,
        credentials: Credentials,
        lifetime: time::Duration,
        refresh_margin: time::Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            url: format!("{}/authenticate", base_url.as_str().trim_end_matches('/')),
            credentials,
            lifetime,
            refresh_margin,
            retry_policy,
            cached: Mutex::new(None),
        }
    }

    async fn exchange(&self) -> Result<AuthToken, AuthError> {
        let token = self
            .retry_policy
            .execute(|attempt| async move {
                let result = self.exchange_once().await;
                if let Err(error) = &result {
                    warn!(attempt, %error, "credential exchange failed");
                }
                result
            })
            .await?;

        metrics::counter!("enrichment_token_refreshes_total").increment(1);
        info!(expires_at = ?token.expires_at, "obtained a new access token");

        Ok(token)
    }

    async fn exchange_once(&self) -> Result<AuthToken, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AuthenticateRequest {
                username: &self.credentials.username,
                password: &self.credentials.password,
            })
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AuthError::RateLimited {
                retry_after: parse_retry_after_header(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(AuthError::Unreachable(format!(
                "authentication returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(AuthError::InvalidCredentials);
        }

        let body: AuthenticateResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        if body.jwt.is_empty() {
            return Err(AuthError::MalformedResponse(
                "authentication returned an empty token".to_owned(),
            ));
        }

        Ok(AuthToken::new(body.jwt, Instant::now() + self.lifetime))
    }
}

#[async_trait]
impl TokenSource for Authenticator {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_usable(Instant::now(), self.refresh_margin) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());

        Ok(token)
    }

    async fn refresh(&self, stale: &AuthToken) -> Result<AuthToken, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token != stale && token.is_usable(Instant::now(), self.refresh_margin) {
                return Ok(token.clone());
            }
        }

        *cached = None;
        let token = self.exchange().await?;
        *cached = Some(token.clone());

        Ok(token)
    }
}
