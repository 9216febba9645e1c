use std::sync::{Arc, Mutex};
use std::time;

use async_trait::async_trait;
use enrichment_common::retry::RetryPolicy;
use enrichment_common::store::{BlobLocation, MemoryBlobStore};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tokio::time::Instant;
use url::Url;

use enrichment_worker::auth::{AuthToken, Authenticator, Credentials, TokenSource};
use enrichment_worker::client::{EnrichmentClient, Endpoint, HttpIdentityApi, IdentityApi};
use enrichment_worker::codec::{self, Template};
use enrichment_worker::error::{ApiError, AuthError, FormatError, JobError};
use enrichment_worker::job::{JobDriver, JobOutcome, JobSettings};
use enrichment_worker::pipeline::Pipeline;
use enrichment_worker::record::{EnrichmentOutcome, Field, StageKind};
use enrichment_worker::stages::default_stages;

const BUCKET: &str = "supplier-data";
const RAW_KEY: &str = "SupplierOperations/dataEnrichment/raw/acme.csv";
const ENHANCED_KEY: &str = "SupplierOperations/dataEnrichment/enhanced/acme.csv";
const HEADER: &str = "Supplier Company,Supplier First Name,Supplier Last Name,Supplier Email,\
    Supplier Phone,Supplier Street,Supplier City,Supplier State,Supplier Zip Code,\
    Supplier Country,Site Name,Site ID,Additional Contact Info";

/// A contact the identity API cannot be reached about, then a supplier it knows everything about.
const TWO_SUPPLIERS: &str = ",,,lost@nowhere.test,,,,,,,North Yard,S-1,\n\
    Acme Corporation,Ada,Lovelace,ada@acme.test,,,,,,US,Plant 4,S-4,night shift\n";

type Handler = dyn Fn(Endpoint, &Value) -> Result<Value, ApiError> + Send + Sync;

struct FakeIdentityApi {
    handler: Box<Handler>,
    calls: Mutex<Vec<Endpoint>>,
}

impl FakeIdentityApi {
    fn new(
        handler: impl Fn(Endpoint, &Value) -> Result<Value, ApiError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityApi for FakeIdentityApi {
    async fn send(
        &self,
        endpoint: Endpoint,
        _token: &AuthToken,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(endpoint);
        (self.handler)(endpoint, body)
    }
}

struct StaticTokens(Result<(), AuthError>);

#[async_trait]
impl TokenSource for StaticTokens {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        self.0.clone().map(|_| {
            AuthToken::new(
                "integration-token",
                Instant::now() + time::Duration::from_secs(3600),
            )
        })
    }

    async fn refresh(&self, _stale: &AuthToken) -> Result<AuthToken, AuthError> {
        self.token().await
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::build(1, time::Duration::ZERO)
        .max_attempts(3)
        .provide()
}

fn settings() -> JobSettings {
    JobSettings {
        write_retry_policy: fast_retries(),
        ..JobSettings::default()
    }
}

fn driver_with(
    store: &MemoryBlobStore,
    api: Arc<FakeIdentityApi>,
    tokens: StaticTokens,
) -> JobDriver {
    let client = EnrichmentClient::new(api, Arc::new(tokens), fast_retries());
    JobDriver::new(
        Arc::new(store.clone()),
        Pipeline::new(default_stages(), client, 4),
        settings(),
    )
}

/// Knows Acme and Ada; every lookup of the unreachable contact fails.
fn supplier_directory() -> Arc<FakeIdentityApi> {
    FakeIdentityApi::new(|endpoint, body| match endpoint {
        Endpoint::ContactEnrich
            if body["matchPersonInput"][0]["emailAddress"] == "lost@nowhere.test" =>
        {
            Err(ApiError::Transient("upstream timeout".to_owned()))
        }
        Endpoint::ContactEnrich => Ok(json!({
            "success": true,
            "data": {"result": [{
                "matchStatus": "FULL_MATCH",
                "data": [{"id": 9001, "firstName": "Ada", "lastName": "Lovelace",
                          "jobTitle": "Head of Procurement"}]
            }]}
        })),
        Endpoint::CompanyEnrich => Ok(json!({
            "success": true,
            "data": {"result": [{"data": [{
                "zi_c_name": "Acme Corporation",
                "zi_c_company_id": 344589814,
                "zi_c_naics6": "332710",
                "zi_c_city": "Springfield",
            }]}]}
        })),
        _ => Err(ApiError::NotFound),
    })
}

fn raw_store(body: &str) -> MemoryBlobStore {
    MemoryBlobStore::new().with_object(
        BlobLocation::new(BUCKET, RAW_KEY),
        format!("{HEADER}\n{body}"),
    )
}

fn raw() -> BlobLocation {
    BlobLocation::new(BUCKET, RAW_KEY)
}

fn enhanced() -> BlobLocation {
    BlobLocation::new(BUCKET, ENHANCED_KEY)
}

#[tokio::test]
async fn test_partial_failures_complete_with_errors() {
    let store = raw_store(TWO_SUPPLIERS);
    let driver = driver_with(&store, supplier_directory(), StaticTokens(Ok(())));

    let report = driver.handle(&raw()).await.expect("job failed");

    assert_eq!(report.outcome, JobOutcome::CompletedWithErrors);
    assert_eq!(report.records, 2);
    assert_eq!(report.failed_records, 1);
    assert_eq!(report.abandoned_records, 0);
    assert_eq!(report.output, format!("s3://{BUCKET}/{ENHANCED_KEY}"));

    let output = store.object(&enhanced()).expect("output was not written");
    assert!(output.starts_with(b"\xEF\xBB\xBF"));
    let records = codec::decode(&output, &Template::enriched_output()).unwrap();
    assert_eq!(records.len(), 2);

    let lost = &records[0];
    assert_eq!(lost.get(Field::SiteId), "S-1");
    assert_eq!(lost.status(), "Failed");
    assert_eq!(
        lost.outcome(StageKind::ContactEnrich),
        Some(EnrichmentOutcome::Failed)
    );
    assert_eq!(
        lost.outcome(StageKind::Company),
        Some(EnrichmentOutcome::Skipped)
    );
    assert!(lost.error_message().contains("upstream timeout"));

    let acme = &records[1];
    assert_eq!(acme.get(Field::SiteId), "S-4");
    assert_eq!(acme.status(), "Success");
    assert_eq!(acme.get(Field::ZoominfoCompanyId), "344589814");
    assert_eq!(acme.get(Field::SectorCode), "31-33");
    assert_eq!(acme.get(Field::PersonId), "9001");
    assert_eq!(acme.get(Field::JobTitle), "Head of Procurement");
    assert_eq!(acme.get(Field::AdditionalContactInfo), "night shift");
    for stage in [
        StageKind::Company,
        StageKind::Classification,
        StageKind::ContactEnrich,
    ] {
        assert_eq!(acme.outcome(stage), Some(EnrichmentOutcome::Enriched));
    }
}

#[tokio::test]
async fn test_reruns_produce_identical_output() {
    let store = raw_store(TWO_SUPPLIERS);
    let driver = driver_with(&store, supplier_directory(), StaticTokens(Ok(())));

    driver.handle(&raw()).await.unwrap();
    let first = store.object(&enhanced()).unwrap();
    driver.handle(&raw()).await.unwrap();
    let second = store.object(&enhanced()).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_header_mismatch_fails_without_output() {
    let store = MemoryBlobStore::new().with_object(raw(), "A,B,D\n1,2,3\n");
    let api = supplier_directory();
    let driver = driver_with(&store, api.clone(), StaticTokens(Ok(())));

    let error = driver.handle(&raw()).await.unwrap_err();

    assert!(matches!(
        error,
        JobError::Format(FormatError::HeaderMismatch { .. })
    ));
    assert_eq!(error.outcome(), JobOutcome::Failed);
    assert!(store.object(&enhanced()).is_none());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_credentials_fail_before_any_lookup() {
    let store = raw_store(TWO_SUPPLIERS);
    let api = supplier_directory();
    let driver = driver_with(
        &store,
        api.clone(),
        StaticTokens(Err(AuthError::InvalidCredentials)),
    );

    let error = driver.handle(&raw()).await.unwrap_err();

    assert!(matches!(
        error,
        JobError::Auth(AuthError::InvalidCredentials)
    ));
    assert!(api.calls().is_empty());
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn test_output_write_is_retried() {
    let store = raw_store(TWO_SUPPLIERS);
    store.fail_next_puts(2);
    let driver = driver_with(&store, supplier_directory(), StaticTokens(Ok(())));

    let report = driver.handle(&raw()).await.unwrap();

    assert_eq!(report.outcome, JobOutcome::CompletedWithErrors);
    assert_eq!(store.put_calls(), 3);
    assert!(store.object(&enhanced()).is_some());
}

#[tokio::test]
async fn test_unwritable_output_fails_the_job() {
    let store = raw_store(TWO_SUPPLIERS);
    store.fail_next_puts(3);
    let driver = driver_with(&store, supplier_directory(), StaticTokens(Ok(())));

    let error = driver.handle(&raw()).await.unwrap_err();

    assert!(matches!(error, JobError::SinkUnavailable { .. }));
    assert_eq!(store.put_calls(), 3);
    assert!(store.object(&enhanced()).is_none());
}

#[tokio::test]
async fn test_enriches_over_http() {
    let server = MockServer::start();
    let authenticate = server.mock(|when, then| {
        when.method(POST)
            .path("/authenticate")
            .json_body(json!({"username": "supplier-ops", "password": "hunter2"}));
        then.status(200).json_body(json!({"jwt": "header.payload.signature"}));
    });
    let company = server.mock(|when, then| {
        when.method(POST).path("/enrich/company-master");
        then.status(200).json_body(json!({
            "success": true,
            "data": {"result": [{"data": {"zi_c_name": "Acme Corporation", "zi_c_naics6": "423510"}}]}
        }));
    });
    let contact = server.mock(|when, then| {
        when.method(POST).path("/enrich/contact");
        then.status(200).json_body(json!({
            "success": true,
            "data": {"result": [{"matchStatus": "NO_MATCH", "data": []}]}
        }));
    });
    let create = server.mock(|when, then| {
        when.method(POST).path("/contact/create");
        then.status(200).json_body(json!({"data": {"id": "P-77"}}));
    });

    let base_url = Url::parse(&server.base_url()).unwrap();
    let http = reqwest::Client::new();
    let tokens = Authenticator::new(
        http.clone(),
        &base_url,
        Credentials::new("supplier-ops", "hunter2"),
        time::Duration::from_secs(3600),
        time::Duration::from_secs(300),
        fast_retries(),
    );
    let client = EnrichmentClient::new(
        Arc::new(HttpIdentityApi::new(http, &base_url)),
        Arc::new(tokens),
        fast_retries(),
    );
    let store = raw_store("Acme Corporation,Grace,Hopper,,,,,,,US,Depot,S-9,\n");
    let driver = JobDriver::new(
        Arc::new(store.clone()),
        Pipeline::new(default_stages(), client, 2),
        settings(),
    );

    let report = driver.handle(&raw()).await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Completed);
    authenticate.assert_hits(1);
    company.assert_hits(1);
    contact.assert_hits(1);
    create.assert_hits(1);

    let output = store.object(&enhanced()).unwrap();
    let records = codec::decode(&output, &Template::enriched_output()).unwrap();
    assert_eq!(records[0].get(Field::SectorTitle), "Wholesale Trade");
    assert_eq!(records[0].get(Field::PersonId), "P-77");
    assert_eq!(records[0].get(Field::ContactMatchCriteria), "created");
    assert_eq!(
        records[0].outcome(StageKind::ContactEnrich),
        Some(EnrichmentOutcome::NotFound)
    );
}
