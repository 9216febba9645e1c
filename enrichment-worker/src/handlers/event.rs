use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use enrichment_common::event::S3Event;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::{JobDriver, JobReport};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub jobs: Vec<JobReport>,
    /// Objects outside the input namespace, and events other than creations.
    #[serde(default)]
    pub ignored: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle an object-created notification. Objects are processed in order and the first failed
/// job fails the whole notification, leaving redelivery to the event source.
pub async fn post_events(
    State(driver): State<Arc<JobDriver>>,
    Json(event): Json<S3Event>,
) -> Result<Json<EventsResponse>, (StatusCode, Json<EventsResponse>)> {
    let locations = event.locations().map_err(|error| {
        warn!(%error, "rejecting undecodable notification");
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(EventsResponse {
                error: Some(error.to_string()),
                ..Default::default()
            }),
        )
    })?;

    let mut response = EventsResponse::default();
    for (record, location) in event.records.iter().zip(locations) {
        if !record.is_object_created() {
            debug!(key = %location, event = %record.event_name, "ignoring non-creation event");
            response.ignored.push(location.to_string());
            continue;
        }
        if !driver.accepts(&location) {
            debug!(key = %location, "ignoring object outside the input namespace");
            response.ignored.push(location.to_string());
            continue;
        }

        match driver.handle(&location).await {
            Ok(report) => response.jobs.push(report),
            Err(error) => {
                response.error = Some(error.to_string());
                return Err((status_for(&error), Json(response)));
            }
        }
    }

    Ok(Json(response))
}

fn status_for(error: &JobError) -> StatusCode {
    match error {
        JobError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
        JobError::Auth(_)
        | JobError::SourceUnavailable { .. }
        | JobError::SinkUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        JobError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{self, Request},
        Router,
    };
    use enrichment_common::store::{BlobLocation, MemoryBlobStore};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::error::AuthError;
    use crate::handlers::add_routes;
    use crate::job::{JobOutcome, JobSettings};
    use crate::pipeline::Pipeline;
    use crate::stages::default_stages;
    use crate::stages::testing::{client, RoutedApi};

    const RAW_KEY: &str = "SupplierOperations/dataEnrichment/raw/q3 suppliers.csv";
    const HEADER: &str = "Supplier Company,Supplier First Name,Supplier Last Name,\
        Supplier Email,Supplier Phone,Supplier Street,Supplier City,Supplier State,\
        Supplier Zip Code,Supplier Country,Site Name,Site ID,Additional Contact Info";

    fn app(store: MemoryBlobStore) -> Router {
        let api = RoutedApi::new(|_, _| Ok(json!({})));
        let driver = JobDriver::new(
            Arc::new(store),
            Pipeline::new(default_stages(), client(api), 1),
            JobSettings::default(),
        );
        add_routes(Router::new(), Arc::new(driver))
    }

    fn notification(key: &str) -> String {
        json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {"bucket": {"name": "supplier-data"}, "object": {"key": key}}
            }]
        })
        .to_string()
    }

    async fn post(app: Router, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/events")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_file_is_enriched() {
        let store = MemoryBlobStore::new().with_object(
            BlobLocation::new("supplier-data", RAW_KEY),
            format!("{HEADER}\n,Ada,Lovelace,,,,,,,,Plant 4,S-4,\n"),
        );

        let (status, body) = post(
            app(store.clone()),
            notification("SupplierOperations/dataEnrichment/raw/q3+suppliers.csv"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let response: EventsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.jobs.len(), 1);
        assert_eq!(response.jobs[0].outcome, JobOutcome::Completed);
        assert_eq!(response.jobs[0].records, 1);

        let output = store
            .object(&BlobLocation::new(
                "supplier-data",
                "SupplierOperations/dataEnrichment/enhanced/q3 suppliers.csv",
            ))
            .expect("output was not written");
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Plant 4,S-4"));
    }

    #[tokio::test]
    async fn test_objects_outside_input_namespace_are_ignored() {
        let store = MemoryBlobStore::new();

        let (status, body) = post(
            app(store.clone()),
            notification("SupplierOperations/dataEnrichment/enhanced/q3.csv"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["ignored"],
            json!(["s3://supplier-data/SupplierOperations/dataEnrichment/enhanced/q3.csv"])
        );
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_removed_objects_are_ignored() {
        let store = MemoryBlobStore::new();
        let body = json!({
            "Records": [{
                "eventName": "ObjectRemoved:Delete",
                "s3": {"bucket": {"name": "supplier-data"}, "object": {"key": RAW_KEY}}
            }]
        })
        .to_string();

        let (status, body) = post(app(store.clone()), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["ignored"],
            json!([format!("s3://supplier-data/{RAW_KEY}")])
        );
        assert_eq!(body["jobs"], json!([]));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_file_is_unprocessable() {
        let store = MemoryBlobStore::new().with_object(
            BlobLocation::new("supplier-data", RAW_KEY),
            "Company,Name\nAcme,Ada\n",
        );

        let (status, body) = post(
            app(store.clone()),
            notification("SupplierOperations/dataEnrichment/raw/q3%20suppliers.csv"),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("header does not match"));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let (status, _) = post(app(MemoryBlobStore::new()), notification(RAW_KEY)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_undecodable_notifications_are_rejected() {
        let (status, _) = post(app(MemoryBlobStore::new()), "{not json".to_owned()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            app(MemoryBlobStore::new()),
            json!({"Records": [{"s3": {}}]}).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = post(app(MemoryBlobStore::new()), "{}".to_owned()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "notification contains no records");
    }

    #[test]
    fn test_status_for_job_errors() {
        assert_eq!(
            status_for(&JobError::Auth(AuthError::InvalidCredentials)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&JobError::Format(crate::error::FormatError::MissingHeader)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
