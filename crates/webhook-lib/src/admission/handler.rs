//! Admission request state machine
//!
//! `Received -> Decoded -> (Filtered | Scoped -> Patched) -> Responded`.
//! Each call to [`AdmissionHandler::answer`] runs the machine once and always
//! produces exactly one allowing response.

use super::review::{peek_uid, AdmissionRequest, AdmissionReview, AdmissionReviewResponse};
use super::AdmissionError;
use crate::namespace::NamespaceFilter;
use crate::observability::{StructuredLogger, WebhookMetrics};
use crate::patch::{build_patch, to_json_patch, RequestsPatch};
use crate::transform::OvercommitRatios;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error};

/// How a review was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Envelope or pod could not be decoded
    Malformed,
    /// Namespace not in the allow-list
    Filtered,
    /// Nothing to adjust
    Unchanged,
    /// Patch attached
    Patched,
    /// Patch construction failed or handling panicked
    Failed,
}

impl AdmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Malformed => "malformed",
            AdmissionOutcome::Filtered => "filtered",
            AdmissionOutcome::Unchanged => "unchanged",
            AdmissionOutcome::Patched => "patched",
            AdmissionOutcome::Failed => "failed",
        }
    }
}

/// Rewrites pod resource requests according to fixed overcommit settings
#[derive(Clone)]
pub struct AdmissionHandler {
    ratios: OvercommitRatios,
    namespaces: NamespaceFilter,
    metrics: WebhookMetrics,
    logger: StructuredLogger,
}

impl AdmissionHandler {
    pub fn new(ratios: OvercommitRatios, namespaces: NamespaceFilter) -> Self {
        Self {
            ratios,
            namespaces,
            metrics: WebhookMetrics::new(),
            logger: StructuredLogger::new("pod-overcommit-webhook"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn ratios(&self) -> &OvercommitRatios {
        &self.ratios
    }

    pub fn namespaces(&self) -> &NamespaceFilter {
        &self.namespaces
    }

    /// Answer one review body. The response always allows admission.
    pub fn handle(&self, body: &[u8]) -> AdmissionReviewResponse {
        self.answer(body).0
    }

    /// Answer one review body and report how it was answered. A panic
    /// anywhere below is answered the same way as a decode failure.
    pub fn answer(&self, body: &[u8]) -> (AdmissionReviewResponse, AdmissionOutcome) {
        let started = Instant::now();

        let answer = panic::catch_unwind(AssertUnwindSafe(|| self.review(body)));
        let (response, outcome) = match answer {
            Ok(answer) => answer,
            Err(_) => {
                let uid = peek_uid(body).unwrap_or_default();
                error!(uid = %uid, "Admission handling panicked, allowing without changes");
                (
                    AdmissionReviewResponse::allow(None, uid),
                    AdmissionOutcome::Failed,
                )
            }
        };

        self.metrics
            .observe_admission(outcome.as_str(), started.elapsed().as_secs_f64());
        (response, outcome)
    }

    fn review(&self, body: &[u8]) -> (AdmissionReviewResponse, AdmissionOutcome) {
        let (api_version, request) = match decode_review(body) {
            Ok(decoded) => decoded,
            Err(e) => {
                let uid = peek_uid(body).unwrap_or_default();
                self.logger.log_admission_error(&uid, &e);
                return (
                    AdmissionReviewResponse::allow(None, uid),
                    AdmissionOutcome::Malformed,
                );
            }
        };
        let allow = AdmissionReviewResponse::allow(api_version.as_deref(), &request.uid);

        let pod = match decode_pod(&request) {
            Ok(pod) => pod,
            Err(e) => {
                self.logger.log_admission_error(&request.uid, &e);
                return (allow, AdmissionOutcome::Malformed);
            }
        };

        let namespace = pod_namespace(&pod, &request);
        let pod_name = pod_name(&pod, &request);

        if !self.namespaces.in_scope(&namespace) {
            debug!(
                uid = %request.uid,
                namespace = %namespace,
                target_namespaces = ?self.namespaces.allowlist(),
                "Namespace not targeted, skipping"
            );
            self.logger
                .log_admission(&request.uid, &namespace, &pod_name, "filtered", 0);
            return (allow, AdmissionOutcome::Filtered);
        }

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();
        let patches = build_patch(containers, |kind, quantity| self.ratios.adjust(kind, quantity));

        if patches.is_empty() {
            self.logger
                .log_admission(&request.uid, &namespace, &pod_name, "unchanged", 0);
            return (allow, AdmissionOutcome::Unchanged);
        }

        let encoded = match encode_patch(&patches) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.logger.log_admission_error(&request.uid, &e);
                return (allow, AdmissionOutcome::Failed);
            }
        };

        self.record_patches(&request.uid, &patches);
        self.logger.log_admission(
            &request.uid,
            &namespace,
            &pod_name,
            "patched",
            patches.len(),
        );
        (allow.with_patch(&encoded), AdmissionOutcome::Patched)
    }

    fn record_patches(&self, uid: &str, patches: &[RequestsPatch]) {
        for patch in patches {
            for adjustment in &patch.adjustments {
                self.logger.log_resource_adjusted(
                    uid,
                    &patch.container_name,
                    adjustment.kind,
                    &adjustment.original.to_string(),
                    &adjustment.adjusted.to_string(),
                    self.ratios.ratio(adjustment.kind),
                );
                self.metrics.inc_resource_adjusted(adjustment.kind);
            }
            if !patch.dropped.is_empty() {
                self.logger
                    .log_requests_dropped(uid, &patch.container_name, &patch.dropped);
            }
        }
        self.metrics.inc_containers_patched(patches.len() as u64);
    }
}

fn decode_review(body: &[u8]) -> Result<(Option<String>, AdmissionRequest), AdmissionError> {
    let review: AdmissionReview = serde_json::from_slice(body).map_err(AdmissionError::Envelope)?;
    let request = review.request.ok_or(AdmissionError::MissingRequest)?;
    Ok((review.api_version, request))
}

fn decode_pod(request: &AdmissionRequest) -> Result<Pod, AdmissionError> {
    let object: &Value = request
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::MissingObject {
            uid: request.uid.clone(),
        })?;
    Pod::deserialize(object).map_err(|source| AdmissionError::Pod {
        uid: request.uid.clone(),
        source,
    })
}

fn encode_patch(patches: &[RequestsPatch]) -> Result<Vec<u8>, AdmissionError> {
    serde_json::to_vec(&to_json_patch(patches)).map_err(AdmissionError::Patch)
}

/// Pods created through a controller usually carry no namespace of their
/// own; the request's namespace is authoritative then.
fn pod_namespace(pod: &Pod, request: &AdmissionRequest) -> String {
    non_empty(pod.metadata.namespace.as_deref())
        .or_else(|| non_empty(request.namespace.as_deref()))
        .unwrap_or_default()
        .to_string()
}

fn pod_name(pod: &Pod, request: &AdmissionRequest) -> String {
    non_empty(pod.metadata.name.as_deref())
        .or_else(|| non_empty(pod.metadata.generate_name.as_deref()))
        .or_else(|| non_empty(request.name.as_deref()))
        .unwrap_or_default()
        .to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
