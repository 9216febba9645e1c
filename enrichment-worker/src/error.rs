use std::time;

use enrichment_common::retry::RetryableError;
use enrichment_common::store::StoreError;
use thiserror::Error;

use crate::job::JobOutcome;

/// Failure to exchange credentials for an access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("the identity service rejected the configured credentials")]
    InvalidCredentials,
    #[error("the identity service is unreachable: {0}")]
    Unreachable(String),
    #[error("the identity service is rate limiting authentication")]
    RateLimited { retry_after: Option<time::Duration> },
    #[error("unexpected authentication response: {0}")]
    MalformedResponse(String),
}

impl RetryableError for AuthError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Unreachable(_) | AuthError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<time::Duration> {
        match self {
            AuthError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Classification of a single exchange with the identity API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("rate limited by the identity API")]
    RateLimited { retry_after: Option<time::Duration> },
    #[error("the identity API rejected the access token")]
    Unauthorized,
    #[error("transient identity API failure: {0}")]
    Transient(String),
    #[error("the identity API has no such resource")]
    NotFound,
    #[error("the identity API rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed identity API response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Label used for the `result` dimension of API call metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Transient(_) => "transient",
            ApiError::NotFound => "not_found",
            ApiError::Rejected { .. } => "rejected",
            ApiError::Malformed(_) => "malformed",
        }
    }
}

impl RetryableError for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Unauthorized | ApiError::Transient(_)
        )
    }

    fn retry_after(&self) -> Option<time::Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// What a stage sees when an identity API call could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageCallError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("the identity API rejected a freshly refreshed access token")]
    AuthRejected,
    #[error("failed to obtain an access token: {0}")]
    Auth(#[from] AuthError),
}

impl RetryableError for StageCallError {
    fn is_retryable(&self) -> bool {
        match self {
            StageCallError::Api(error) => error.is_retryable(),
            StageCallError::AuthRejected | StageCallError::Auth(_) => false,
        }
    }

    fn retry_after(&self) -> Option<time::Duration> {
        match self {
            StageCallError::Api(error) => error.retry_after(),
            _ => None,
        }
    }
}

/// The input file does not have the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("input is not valid UTF-8 text: {0}")]
    Encoding(String),
    #[error("input has no header row")]
    MissingHeader,
    #[error("column {0:?} appears more than once in the header")]
    DuplicateHeader(String),
    #[error(
        "header does not match the expected template (missing: [{}], unexpected: [{}])",
        .missing.join(", "),
        .unexpected.join(", ")
    )]
    HeaderMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("malformed CSV: {0}")]
    Csv(String),
    #[error("column {column:?} holds an unknown outcome {value:?}")]
    InvalidOutcome { column: String, value: String },
}

impl From<csv::Error> for FormatError {
    fn from(error: csv::Error) -> Self {
        FormatError::Csv(error.to_string())
    }
}

/// A job-level failure: no output is written.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("failed to read input {location}: {error}")]
    SourceUnavailable { location: String, error: StoreError },
    #[error("failed to write output {location}: {error}")]
    SinkUnavailable { location: String, error: StoreError },
    #[error("failed to encode output: {0}")]
    Encode(FormatError),
}

impl JobError {
    pub fn outcome(&self) -> JobOutcome {
        JobOutcome::Failed
    }
}
