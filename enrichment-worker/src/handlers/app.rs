use std::sync::Arc;

use axum::{routing, Router};

use super::event;
use crate::job::JobDriver;

pub fn add_routes(router: Router, driver: Arc<JobDriver>) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_liveness", routing::get(index))
        .route("/events", routing::post(event::post_events).with_state(driver))
}

pub async fn index() -> &'static str {
    "supplier enrichment worker"
}
