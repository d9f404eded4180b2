//! Observability infrastructure for the webhook
//!
//! Provides:
//! - Prometheus metrics (admission outcomes, latency, patched containers, ratios)
//! - Structured JSON logging with tracing

use crate::transform::{OvercommitRatios, ResourceKind};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for admission latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WebhookMetricsInner> = OnceLock::new();

struct WebhookMetricsInner {
    admission_requests: IntCounterVec,
    admission_latency_seconds: Histogram,
    containers_patched: IntCounter,
    resources_adjusted: IntCounterVec,
    overcommit_ratio: GaugeVec,
}

impl WebhookMetricsInner {
    fn new() -> Self {
        Self {
            admission_requests: register_int_counter_vec!(
                "overcommit_webhook_admission_requests_total",
                "Admission reviews handled, by outcome",
                &["outcome"]
            )
            .expect("Failed to register admission_requests_total"),

            admission_latency_seconds: register_histogram!(
                "overcommit_webhook_admission_latency_seconds",
                "Time spent handling one admission review",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register admission_latency_seconds"),

            containers_patched: register_int_counter!(
                "overcommit_webhook_containers_patched_total",
                "Containers whose resource requests were rewritten"
            )
            .expect("Failed to register containers_patched_total"),

            resources_adjusted: register_int_counter_vec!(
                "overcommit_webhook_resources_adjusted_total",
                "Individual resource requests rewritten, by resource",
                &["resource"]
            )
            .expect("Failed to register resources_adjusted_total"),

            overcommit_ratio: register_gauge_vec!(
                "overcommit_webhook_overcommit_ratio",
                "Configured overcommit ratio, by resource",
                &["resource"]
            )
            .expect("Failed to register overcommit_ratio"),
        }
    }
}

/// Webhook metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct WebhookMetrics {
    _private: (),
}

impl Default for WebhookMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WebhookMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WebhookMetricsInner {
        GLOBAL_METRICS.get_or_init(WebhookMetricsInner::new)
    }

    /// Record one handled review
    pub fn observe_admission(&self, outcome: &str, duration_secs: f64) {
        self.inner()
            .admission_requests
            .with_label_values(&[outcome])
            .inc();
        self.inner().admission_latency_seconds.observe(duration_secs);
    }

    pub fn inc_containers_patched(&self, count: u64) {
        self.inner().containers_patched.inc_by(count);
    }

    pub fn inc_resource_adjusted(&self, kind: ResourceKind) {
        self.inner()
            .resources_adjusted
            .with_label_values(&[kind.name()])
            .inc();
    }

    /// Publish the configured ratios
    pub fn set_ratios(&self, ratios: &OvercommitRatios) {
        for kind in ResourceKind::ALL {
            self.inner()
                .overcommit_ratio
                .with_label_values(&[kind.name()])
                .set(ratios.ratio(kind));
        }
    }
}

/// Structured logger for webhook events
///
/// Provides consistent JSON-formatted logging for admissions, resource
/// adjustments and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log webhook startup
    pub fn log_startup(&self, version: &str, ratios: &OvercommitRatios, namespaces: &[String]) {
        info!(
            event = "webhook_started",
            service = %self.service_name,
            version = %version,
            cpu_ratio = ratios.cpu,
            memory_ratio = ratios.memory,
            target_namespaces = ?namespaces,
            "Overcommit webhook started"
        );
    }

    /// Log webhook shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "webhook_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Overcommit webhook shutting down"
        );
    }

    /// Log the final decision for one review
    pub fn log_admission(
        &self,
        uid: &str,
        namespace: &str,
        pod_name: &str,
        outcome: &str,
        patched_containers: usize,
    ) {
        info!(
            event = "admission_reviewed",
            service = %self.service_name,
            uid = %uid,
            namespace = %namespace,
            pod_name = %pod_name,
            outcome = %outcome,
            patched_containers = patched_containers,
            "Admission review answered"
        );
    }

    /// Log a review that could not be decoded or processed
    pub fn log_admission_error(&self, uid: &str, error: &dyn std::error::Error) {
        warn!(
            event = "admission_failed_open",
            service = %self.service_name,
            uid = %uid,
            error = %error,
            "Admission review allowed without changes"
        );
    }

    /// Log one rewritten request
    pub fn log_resource_adjusted(
        &self,
        uid: &str,
        container: &str,
        resource: ResourceKind,
        original: &str,
        adjusted: &str,
        ratio: f64,
    ) {
        info!(
            event = "resource_adjusted",
            service = %self.service_name,
            uid = %uid,
            container = %container,
            resource = %resource,
            original = %original,
            adjusted = %adjusted,
            ratio = ratio,
            "Resource request adjusted"
        );
    }

    /// Log requests that a patch replaces away
    pub fn log_requests_dropped(&self, uid: &str, container: &str, dropped: &[String]) {
        warn!(
            event = "requests_dropped",
            service = %self.service_name,
            uid = %uid,
            container = %container,
            dropped = ?dropped,
            "Patch replaces resource requests the webhook does not rewrite"
        );
    }

    /// Log the outcome of webhook registration
    pub fn log_registration(&self, configuration: &str, result: Result<(), &str>) {
        match result {
            Ok(()) => info!(
                event = "webhook_registered",
                service = %self.service_name,
                configuration = %configuration,
                "MutatingWebhookConfiguration applied"
            ),
            Err(reason) => error!(
                event = "webhook_registration_failed",
                service = %self.service_name,
                configuration = %configuration,
                reason = %reason,
                "Failed to register webhook, continuing without it"
            ),
        }
    }
}
