//! Pull endpoint polled by the kernel's ingestion workers.

use crate::metrics::Sampler;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use jetson_kernel::models::NodeReport;
use parking_lot::Mutex;
use std::sync::Arc;

pub type SharedSampler = Arc<Mutex<Sampler>>;

pub fn build_router(sampler: SharedSampler) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/sample", get(get_sample))
        .with_state(sampler)
}

// GET /api/sample
async fn get_sample(State(sampler): State<SharedSampler>) -> Json<NodeReport> {
    Json(sampler.lock().sample())
}
