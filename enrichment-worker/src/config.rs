use std::num::NonZeroU32;
use std::str::FromStr;
use std::time;

use enrichment_common::retry::RetryPolicy;
use envconfig::Envconfig;

use crate::auth::Credentials;
use crate::job::JobSettings;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "https://api.zoominfo.com")]
    pub api_base_url: String,

    pub api_username: NonEmptyString,

    pub api_password: NonEmptyString,

    #[envconfig(default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "3600000")]
    pub token_lifetime: EnvMsDuration,

    #[envconfig(default = "300000")]
    pub token_refresh_margin: EnvMsDuration,

    #[envconfig(default = "4")]
    pub max_concurrent_records: usize,

    #[envconfig(default = "4")]
    pub max_concurrent_requests: usize,

    #[envconfig(default = "10")]
    pub requests_per_second: NonZeroU32,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(default = "3")]
    pub store_write_attempts: u32,

    #[envconfig(default = "840000")]
    pub job_timeout: EnvMsDuration,

    #[envconfig(default = "SupplierOperations/dataEnrichment/raw/")]
    pub input_prefix: NonEmptyString,

    #[envconfig(default = "SupplierOperations/dataEnrichment/enhanced/")]
    pub output_prefix: NonEmptyString,

    #[envconfig(default = "us-east-1")]
    pub object_storage_region: String,

    pub object_storage_endpoint: Option<String>,

    /// Bound on each blob-store read or write, retries by the SDK included.
    #[envconfig(default = "30000")]
    pub object_storage_timeout: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_username.as_str(), self.api_password.as_str())
    }

    /// Policy applied to authentication and to every identity API call.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
            .builder()
            .max_attempts(self.retry_policy.max_attempts)
            .provide()
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            input_prefix: self.input_prefix.as_str().to_owned(),
            output_prefix: self.output_prefix.as_str().to_owned(),
            timeout: self.job_timeout.0,
            write_retry_policy: self
                .retry_policy
                .builder()
                .max_attempts(self.store_write_attempts)
                .provide(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "3")]
    pub max_attempts: u32,

    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "500")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub maximum_interval: EnvMsDuration,
}

impl RetryPolicyConfig {
    fn builder(&self) -> enrichment_common::retry::RetryPolicyBuilder {
        RetryPolicy::build(self.backoff_coefficient, self.initial_interval.0)
            .maximum_interval(self.maximum_interval.0)
    }
}

#[derive(Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
