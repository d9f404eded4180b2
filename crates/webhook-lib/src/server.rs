//! HTTP routes for admission, health checks and Prometheus metrics

use crate::admission::{AdmissionHandler, AdmissionOutcome};
use crate::health::{components, ComponentStatus, HealthRegistry};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::error;

/// Largest review body accepted on `/mutate`. The API server caps requests
/// at 3 MiB and a review can carry both the new and the old object.
pub const MAX_REVIEW_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handler: AdmissionHandler,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(handler: AdmissionHandler, health_registry: HealthRegistry) -> Self {
        Self {
            handler,
            health_registry,
        }
    }
}

/// Admission endpoint. Always answers 200 with an allowing review.
async fn mutate(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let (review, outcome) = state.handler.answer(&body);
    track_admission(&state.health_registry, outcome).await;
    (StatusCode::OK, Json(review))
}

/// Degrade the admission component while reviews fail open, and restore it
/// on the next review that completes. Malformed bodies say nothing about
/// the webhook itself.
async fn track_admission(registry: &HealthRegistry, outcome: AdmissionOutcome) {
    match outcome {
        AdmissionOutcome::Failed => {
            registry
                .set_degraded(components::ADMISSION, "Last admission review failed open")
                .await;
        }
        AdmissionOutcome::Malformed => {}
        AdmissionOutcome::Filtered | AdmissionOutcome::Unchanged | AdmissionOutcome::Patched => {
            if registry.status(components::ADMISSION).await != Some(ComponentStatus::Healthy) {
                registry.set_healthy(components::ADMISSION).await;
            }
        }
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the webhook router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate).layer(DefaultBodyLimit::max(MAX_REVIEW_BYTES)))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}
