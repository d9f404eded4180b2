//! JSON patch construction for container resource requests
//!
//! Each container that needs at least one adjustment gets a single `add`
//! operation on `/spec/containers/<index>/resources/requests`. The operation
//! replaces the whole requests object, so any request the webhook does not
//! rewrite (for example an untouched `memory`, or `ephemeral-storage`) is
//! dropped by the patch. Those names are recorded in [`RequestsPatch::dropped`]
//! so callers can log them.

use crate::quantity::{QuantityError, ResourceQuantity};
use crate::transform::ResourceKind;
use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Container;
use serde_json::{Map, Value};
use tracing::warn;

/// One rewritten request
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAdjustment {
    pub kind: ResourceKind,
    pub original: ResourceQuantity,
    pub adjusted: ResourceQuantity,
}

/// Rewritten requests for one container
#[derive(Debug, Clone, PartialEq)]
pub struct RequestsPatch {
    pub container_index: usize,
    pub container_name: String,
    /// Changed resources, cpu before memory
    pub adjustments: Vec<ResourceAdjustment>,
    /// Requests present on the container that the patch replaces away
    pub dropped: Vec<String>,
}

impl RequestsPatch {
    pub fn path(&self) -> String {
        format!("/spec/containers/{}/resources/requests", self.container_index)
    }

    /// Value object of the `add` operation: resource name to adjusted quantity
    pub fn value(&self) -> Value {
        let mut requests = Map::new();
        for adjustment in &self.adjustments {
            requests.insert(
                adjustment.kind.name().to_string(),
                Value::String(adjustment.adjusted.to_string()),
            );
        }
        Value::Object(requests)
    }

    pub fn to_operation(&self) -> PatchOperation {
        let index = self.container_index.to_string();
        let tokens = ["spec", "containers", index.as_str(), "resources", "requests"];
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(tokens),
            value: self.value(),
        })
    }
}

/// Visit containers in order and collect the requests that `adjust` changes.
///
/// `adjust` returns `None` for a resource that stays as it is. A container
/// whose cpu or memory request cannot be parsed is skipped without affecting
/// the others.
pub fn build_patch<F>(containers: &[Container], mut adjust: F) -> Vec<RequestsPatch>
where
    F: FnMut(ResourceKind, &ResourceQuantity) -> Option<ResourceQuantity>,
{
    let mut patches = Vec::new();

    for (index, container) in containers.iter().enumerate() {
        match container_patch(index, container, &mut adjust) {
            Ok(Some(patch)) => patches.push(patch),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    container_index = index,
                    container = %container.name,
                    error = %e,
                    "Skipping container with unparseable resource request"
                );
            }
        }
    }

    patches
}

/// Render collected patches as a JSON patch document
pub fn to_json_patch(patches: &[RequestsPatch]) -> Patch {
    Patch(patches.iter().map(RequestsPatch::to_operation).collect())
}

fn container_patch<F>(
    index: usize,
    container: &Container,
    adjust: &mut F,
) -> Result<Option<RequestsPatch>, QuantityError>
where
    F: FnMut(ResourceKind, &ResourceQuantity) -> Option<ResourceQuantity>,
{
    let Some(requests) = container
        .resources
        .as_ref()
        .and_then(|resources| resources.requests.as_ref())
        .filter(|requests| !requests.is_empty())
    else {
        return Ok(None);
    };

    let mut adjustments = Vec::new();
    for kind in ResourceKind::ALL {
        let Some(quantity) = requests.get(kind.name()) else {
            continue;
        };
        let original = ResourceQuantity::try_from(quantity)?;
        if original.is_zero() || original.is_negative() {
            continue;
        }
        if let Some(adjusted) = adjust(kind, &original) {
            adjustments.push(ResourceAdjustment {
                kind,
                original,
                adjusted,
            });
        }
    }

    if adjustments.is_empty() {
        return Ok(None);
    }

    let dropped = requests
        .keys()
        .filter(|name| !adjustments.iter().any(|a| a.kind.name() == name.as_str()))
        .cloned()
        .collect();

    Ok(Some(RequestsPatch {
        container_index: index,
        container_name: container.name.clone(),
        adjustments,
        dropped,
    }))
}
