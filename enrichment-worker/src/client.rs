//! Calls to the identity API, with retries, token refresh and a shared request budget.
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use enrichment_common::retry::RetryPolicy;
use governor::{clock, state, Quota, RateLimiter};
use http::StatusCode;
use reqwest::header;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::auth::{AuthToken, TokenSource};
use crate::error::{ApiError, StageCallError};
use crate::record::StageKind;

/// Longest response body kept in a `Rejected` error.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CompanyEnrich,
    ContactEnrich,
    ContactSearch,
    ContactCreate,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::CompanyEnrich => "/enrich/company-master",
            Endpoint::ContactEnrich => "/enrich/contact",
            Endpoint::ContactSearch => "/search/contact",
            Endpoint::ContactCreate => "/contact/create",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::CompanyEnrich => "company_enrich",
            Endpoint::ContactEnrich => "contact_enrich",
            Endpoint::ContactSearch => "contact_search",
            Endpoint::ContactCreate => "contact_create",
        }
    }
}

/// One request/response exchange with the identity API.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn send(
        &self,
        endpoint: Endpoint,
        token: &AuthToken,
        body: &Value,
    ) -> Result<Value, ApiError>;
}

pub fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("Supplier Enrichment Worker")
        .timeout(request_timeout)
        .build()
}

pub struct HttpIdentityApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityApi {
    pub fn new(client: reqwest::Client, base_url: &Url) -> Self {
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl IdentityApi for HttpIdentityApi {
    async fn send(
        &self,
        endpoint: Endpoint,
        token: &AuthToken,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint.path()))
            .bearer_auth(token.value())
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        let retry_after = parse_retry_after_header(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ApiError::Malformed(e.to_string()));
        }

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::REQUEST_TIMEOUT => ApiError::Transient(format!("status {status}")),
            status if status.is_server_error() => ApiError::Transient(format!("status {status}")),
            status => ApiError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            },
        })
    }
}

type DirectRateLimiter = RateLimiter<state::NotKeyed, state::InMemoryState, clock::DefaultClock>;

/// The identity API as seen by stages: every call goes through the retry policy, forces a single
/// token refresh on a rejected token, and draws from a concurrency and rate budget shared by all
/// records of the process.
pub struct EnrichmentClient {
    api: Arc<dyn IdentityApi>,
    tokens: Arc<dyn TokenSource>,
    retry_policy: RetryPolicy,
    budget: Arc<Semaphore>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl EnrichmentClient {
    pub fn new(
        api: Arc<dyn IdentityApi>,
        tokens: Arc<dyn TokenSource>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            tokens,
            retry_policy,
            budget: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            limiter: None,
        }
    }

    /// Cap the number of requests in flight at once.
    pub fn with_request_budget(mut self, max_concurrent_requests: usize) -> Self {
        self.budget = Arc::new(Semaphore::new(max_concurrent_requests.max(1)));
        self
    }

    /// Cap the number of requests started per second.
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(per_second))));
        self
    }

    pub fn tokens(&self) -> &dyn TokenSource {
        self.tokens.as_ref()
    }

    pub fn for_stage(&self, stage: StageKind) -> StageClient<'_> {
        StageClient {
            client: self,
            stage,
            attempts: AtomicU32::new(0),
        }
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        token: &AuthToken,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let _permit = self
            .budget
            .acquire()
            .await
            .map_err(|_| ApiError::Transient("request budget is closed".to_owned()))?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        self.api.send(endpoint, token, body).await
    }
}

/// A handle for the calls of one stage on one record; counts every attempt made.
pub struct StageClient<'a> {
    client: &'a EnrichmentClient,
    stage: StageKind,
    attempts: AtomicU32,
}

impl StageClient<'_> {
    /// Attempts made through this handle so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn call(&self, endpoint: Endpoint, body: &Value) -> Result<Value, StageCallError> {
        let refreshed = AtomicBool::new(false);
        let refreshed = &refreshed;
        let max_attempts = self.client.retry_policy.max_attempts.max(1);

        self.client
            .retry_policy
            .execute(|attempt| async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let token = self.client.tokens.token().await?;

                let result = self.client.send(endpoint, &token, body).await;
                let label = match &result {
                    Ok(_) => "success",
                    Err(error) => error.label(),
                };
                metrics::counter!(
                    "enrichment_api_calls_total",
                    "endpoint" => endpoint.as_str(),
                    "result" => label
                )
                .increment(1);
                debug!(
                    stage = self.stage.as_str(),
                    endpoint = endpoint.as_str(),
                    attempt,
                    result = label,
                    "identity API call finished"
                );

                match result {
                    Ok(value) => Ok(value),
                    Err(ApiError::Unauthorized) if refreshed.load(Ordering::SeqCst) => {
                        Err(StageCallError::AuthRejected)
                    }
                    // A refresh is only worth it when another attempt will use the new token.
                    Err(ApiError::Unauthorized) if attempt >= max_attempts => {
                        Err(StageCallError::Api(ApiError::Unauthorized))
                    }
                    Err(ApiError::Unauthorized) => {
                        refreshed.store(true, Ordering::SeqCst);
                        self.client.tokens.refresh(&token).await?;
                        Err(StageCallError::Api(ApiError::Unauthorized))
                    }
                    Err(error) => Err(StageCallError::Api(error)),
                }
            })
            .await
    }

    /// Like `call`, but a missing resource is an empty result rather than an error.
    pub async fn call_optional(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<Option<Value>, StageCallError> {
        match self.call(endpoint, body).await {
            Ok(value) => Ok(Some(value)),
            Err(StageCallError::Api(ApiError::NotFound)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Attempt to parse a Duration from a Retry-After header, returning None if not possible.
/// Retry-After header can specify a date in RFC2822 or a number of seconds; we try to parse both.
pub(crate) fn parse_retry_after_header(header_map: &header::HeaderMap) -> Option<time::Duration> {
    let retry_after = header_map.get(header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(u) = retry_after.parse::<u64>() {
        return Some(time::Duration::from_secs(u));
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let duration =
            chrono::DateTime::<chrono::offset::Utc>::from(dt) - chrono::offset::Utc::now();

        // This can only fail when negative, in which case we return None.
        return duration.to_std().ok();
    }

    None
}
