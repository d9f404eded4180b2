//! Admission review handling
//!
//! Decodes an AdmissionReview, scopes the pod by namespace, rewrites its
//! container resource requests and answers with a JSON patch. Every review
//! is allowed: decoding and patching failures are logged and answered
//! without a patch.

mod handler;
mod review;

#[cfg(test)]
mod tests;

pub use handler::{AdmissionHandler, AdmissionOutcome};
pub use review::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionReviewResponse, PatchType,
    DEFAULT_API_VERSION, REVIEW_KIND,
};

use thiserror::Error;

/// Reasons a review is answered without a patch
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed to decode admission review: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("admission review has no request")]
    MissingRequest,

    #[error("admission request {uid} has no object")]
    MissingObject { uid: String },

    #[error("failed to decode pod from admission request {uid}: {source}")]
    Pod {
        uid: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode patch: {0}")]
    Patch(#[source] serde_json::Error),
}
