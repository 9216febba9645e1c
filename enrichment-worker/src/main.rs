//! Enrich supplier files as object-created notifications for them arrive.
use std::sync::Arc;

use aws_config::{timeout::TimeoutConfig, BehaviorVersion};
use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use enrichment_common::metrics::{serve, setup_metrics_routes};
use enrichment_common::store::S3BlobStore;
use enrichment_worker::auth::Authenticator;
use enrichment_worker::client::{build_http_client, EnrichmentClient, HttpIdentityApi};
use enrichment_worker::config::Config;
use enrichment_worker::handlers::add_routes;
use enrichment_worker::job::JobDriver;
use enrichment_worker::pipeline::Pipeline;
use enrichment_worker::stages::default_stages;

async fn s3_client(config: &Config) -> aws_sdk_s3::Client {
    let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.object_storage_region.clone()));

    if let Some(endpoint) = &config.object_storage_endpoint {
        aws_config_builder = aws_config_builder.endpoint_url(endpoint);
    }

    let aws_config = aws_config_builder.load().await;

    let timeout_config = TimeoutConfig::builder()
        .operation_timeout(config.object_storage_timeout.0)
        .build();

    let mut s3_config_builder =
        aws_sdk_s3::config::Builder::from(&aws_config).timeout_config(timeout_config);
    if config.object_storage_endpoint.is_some() {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()
        .map_err(|e| eyre::eyre!("invalid configuration: {e:?}"))?;

    let base_url = Url::parse(&config.api_base_url)?;
    let http_client = build_http_client(config.request_timeout.0)?;
    let retry_policy = config.retry_policy();

    let authenticator = Authenticator::new(
        http_client.clone(),
        &base_url,
        config.credentials(),
        config.token_lifetime.0,
        config.token_refresh_margin.0,
        retry_policy.clone(),
    );
    let client = EnrichmentClient::new(
        Arc::new(HttpIdentityApi::new(http_client, &base_url)),
        Arc::new(authenticator),
        retry_policy,
    )
    .with_request_budget(config.max_concurrent_requests)
    .with_rate_limit(config.requests_per_second);

    let pipeline = Pipeline::new(default_stages(), client, config.max_concurrent_records);
    let store = S3BlobStore::new(s3_client(&config).await);
    let driver = JobDriver::new(Arc::new(store), pipeline, config.job_settings());

    let router = add_routes(Router::new(), Arc::new(driver));
    let router = setup_metrics_routes(router)?;

    let bind = config.bind();
    info!(%bind, "serving enrichment worker");
    serve(router, &bind).await?;

    Ok(())
}
