//! AdmissionReview wire types
//!
//! Only the fields the webhook reads are modelled on the request side. The
//! embedded object is kept as raw JSON so that a malformed pod can be told
//! apart from a malformed envelope.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_API_VERSION: &str = "admission.k8s.io/v1";
pub const REVIEW_KIND: &str = "AdmissionReview";

/// Inbound review envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub request: Option<AdmissionRequest>,
}

/// The request half of a review
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Outbound review envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// The response half of a review. `allowed` is always true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    /// Base64-encoded JSON patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionReviewResponse {
    /// Allow without changes
    pub fn allow(api_version: Option<&str>, uid: impl Into<String>) -> Self {
        Self {
            api_version: api_version.unwrap_or(DEFAULT_API_VERSION).to_string(),
            kind: REVIEW_KIND.to_string(),
            response: AdmissionResponse {
                uid: uid.into(),
                allowed: true,
                patch: None,
                patch_type: None,
            },
        }
    }

    /// Attach an encoded JSON patch. Empty patches are not attached.
    pub fn with_patch(mut self, patch: &[u8]) -> Self {
        if !patch.is_empty() {
            self.response.patch = Some(STANDARD.encode(patch));
            self.response.patch_type = Some(PatchType::JsonPatch);
        }
        self
    }

    /// Decoded patch bytes, if any
    pub fn patch_bytes(&self) -> Option<Vec<u8>> {
        self.response
            .patch
            .as_deref()
            .and_then(|encoded| STANDARD.decode(encoded).ok())
    }
}

/// Best-effort uid lookup for bodies the full decode rejected
pub(crate) fn peek_uid(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("request")?
        .get("uid")?
        .as_str()
        .map(str::to_string)
}
