//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request
//! handlers simultaneously.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many HTTP handlers can hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time (thread-safe)
//! - **T**: The actual data type being protected
//!
//! The transcription capability and the storage handle are injected here and
//! passed into each handler through `web::Data<AppState>`; no handler reaches
//! for global mutable model or cache state.

use crate::config::AppConfig;
use crate::tasks::{TaskQueue, TaskStore};
use crate::transcription::TranscriptionEngine;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Thread Safety Pattern:
/// Mutable data sits behind `Arc<RwLock<T>>`: multiple requests can read
/// simultaneously, only one can modify at a time, and the type system rules
/// out data races.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (readable by every handler)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Task table handle (SQLite plus in-memory cache)
    pub store: TaskStore,

    /// Transcription engine: owns the Whisper model, implements the
    /// transcription capability the worker consumes
    pub engine: Arc<TranscriptionEngine>,

    /// Enqueue handle for background correction jobs
    pub queue: TaskQueue,

    /// When the server started (never changes, Instant is Copy)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability monitoring
/// - **active_tasks**: correction jobs accepted but not yet terminal
/// - **endpoint_metrics**: per-endpoint statistics
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Correction tasks enqueued and not yet completed or errored
    pub active_tasks: u32,

    /// Detailed metrics for each API endpoint (e.g. "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Assemble the application state from its injected parts.
    ///
    /// The metrics handle is created by the caller so the worker pool (spawned
    /// before the HTTP server) can share it.
    pub fn new(
        config: AppConfig,
        store: TaskStore,
        engine: Arc<TranscriptionEngine>,
        queue: TaskQueue,
        metrics: Arc<RwLock<AppMetrics>>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics,
            store,
            engine,
            queue,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    /// AppConfig is designed to be cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a newly accepted correction task.
    ///
    /// The matching decrement happens in the worker when the task reaches a
    /// terminal state.
    pub fn increment_active_tasks(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_tasks += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Takes a read lock and clones so the lock isn't held while the HTTP
    /// response is generated.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_tasks: metrics.active_tasks,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metric_averages() {
        let metric = EndpointMetric {
            request_count: 10,
            total_duration_ms: 500,
            error_count: 2,
        };
        assert_eq!(metric.average_duration_ms(), 50.0);
        assert_eq!(metric.error_rate(), 0.2);

        let empty = EndpointMetric::default();
        assert_eq!(empty.average_duration_ms(), 0.0);
        assert_eq!(empty.error_rate(), 0.0);
    }
}
