//! # Application State Management
//!
//! Shared state handed to every HTTP request handler: runtime-updatable
//! configuration, request metrics, and the live-session collaborators
//! (session registry, feedback analyzer, history store, behavioral mock).
//!
//! ## Thread Safety Pattern:
//! Mutable data sits behind Arc<RwLock<T>> so many handlers can read
//! simultaneously while updates stay exclusive. The collaborators are
//! internally synchronized and shared as plain Arcs.

use crate::coaching::{BehavioralAnalyzer, FeedbackService, SessionStore};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::session::SessionManager;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime via PUT /config)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Registry of live interview sessions
    pub sessions: Arc<SessionManager>,

    /// Post-session transcript analyzer
    pub feedback: Arc<dyn FeedbackService>,

    /// Per-user interview history
    pub store: Arc<dyn SessionStore>,

    /// Real-time speech-confidence mock polled by the UI
    pub analyzer: Arc<BehavioralAnalyzer>,

    /// When the server started (never changes, safe to read without a lock)
    pub start_time: Instant,
}

/// Request metrics collected across all endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed metrics for one API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative processing time across all requests, in milliseconds
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        sessions: Arc<SessionManager>,
        feedback: Arc<dyn FeedbackService>,
        store: Arc<dyn SessionStore>,
        analyzer: Arc<BehavioralAnalyzer>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions,
            feedback,
            store,
            analyzer,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the read lock
    /// immediately so other handlers are never blocked on it.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it. An invalid update
    /// leaves the running configuration untouched.
    pub fn update_config(&self, new_config: AppConfig) -> AppResult<()> {
        new_config.validate()?;
        *self.config.write().unwrap() = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Record one processed request for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count of live sessions, derived from the registry rather than a
    /// separately maintained counter so it can never drift.
    pub fn active_session_count(&self) -> usize {
        self.sessions.active_count()
    }

    /// Snapshot of current metrics for the /metrics endpoint. Clones under a
    /// read lock so the lock is not held during response serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
