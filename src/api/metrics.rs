//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helper functions to record order, appointment and job events

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const ORDERS_TOTAL: &str = "orders_total";
pub const APPOINTMENTS_TOTAL: &str = "appointments_total";
pub const SCHEDULED_JOBS_TOTAL: &str = "scheduled_jobs_total";
pub const PENDING_JOBS: &str = "scheduled_jobs_pending";
pub const OPEN_ORDERS: &str = "orders_open";

/// Initialize the Prometheus metrics recorder and return a handle for rendering metrics.
///
/// This should be called once during application startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(ORDERS_TOTAL, "Order lifecycle events by kind");
    describe_counter!(APPOINTMENTS_TOTAL, "Appointment lifecycle events by kind");
    describe_counter!(SCHEDULED_JOBS_TOTAL, "Executed scheduled jobs by kind and outcome");
    describe_gauge!(PENDING_JOBS, "Scheduled jobs waiting to run");
    describe_gauge!(OPEN_ORDERS, "Orders that are neither completed nor cancelled");

    Ok(handle)
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scheduled_jobs WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await
    {
        gauge!(PENDING_JOBS).set(count as f64);
    }

    if let Ok(count) = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM orders WHERE status NOT IN ('completed', 'cancelled')",
    )
    .fetch_one(&state.db)
    .await
    {
        gauge!(OPEN_ORDERS).set(count as f64);
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Use the matched route template (`/api/orders/:id`) to keep label cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_order_event(event: &'static str) {
    counter!(ORDERS_TOTAL, "event" => event).increment(1);
}

pub fn record_appointment_event(event: &'static str) {
    counter!(APPOINTMENTS_TOTAL, "event" => event).increment(1);
}

pub fn record_job_outcome(kind: String, outcome: &'static str) {
    counter!(SCHEDULED_JOBS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}
