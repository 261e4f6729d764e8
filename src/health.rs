//! # Health and Metrics Endpoints
//!
//! Liveness and observability surface. `/health` answers load-balancer
//! probes; `/metrics` exposes the request counters and per-endpoint
//! statistics collected by the metrics middleware, plus the live-session
//! gauge.

use crate::state::AppState;
use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
    timestamp: String,
}

#[derive(Serialize)]
struct MetricsResponse {
    uptime_seconds: u64,
    request_count: u64,
    error_count: u64,
    active_sessions: usize,
    active_session_ids: Vec<String>,
    requests_per_second: f64,
    endpoints: HashMap<String, EndpointSummary>,
}

#[derive(Serialize)]
struct EndpointSummary {
    request_count: u64,
    error_count: u64,
    average_duration_ms: f64,
    error_rate: f64,
}

/// Liveness probe. Always 200 while the process is serving.
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.get_uptime_seconds(),
        active_sessions: state.active_session_count(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Full metrics snapshot with per-endpoint breakdown.
pub async fn detailed_metrics(state: web::Data<AppState>) -> Result<HttpResponse> {
    let snapshot = state.get_metrics_snapshot();
    let uptime = state.get_uptime_seconds();

    let endpoints = snapshot
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            (
                endpoint.clone(),
                EndpointSummary {
                    request_count: metric.request_count,
                    error_count: metric.error_count,
                    average_duration_ms: metric.average_duration_ms(),
                    error_rate: metric.error_rate(),
                },
            )
        })
        .collect();

    let requests_per_second = if uptime > 0 {
        snapshot.request_count as f64 / uptime as f64
    } else {
        0.0
    };

    Ok(HttpResponse::Ok().json(MetricsResponse {
        uptime_seconds: uptime,
        request_count: snapshot.request_count,
        error_count: snapshot.error_count,
        active_sessions: state.active_session_count(),
        active_session_ids: state.sessions.active_ids(),
        requests_per_second,
        endpoints,
    }))
}
