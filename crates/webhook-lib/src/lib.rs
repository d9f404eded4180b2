//! Pod overcommit admission webhook library
//!
//! This crate provides the core functionality for:
//! - Parsing and rendering Kubernetes resource quantities
//! - Scaling CPU and memory requests down by an overcommit ratio
//! - Building JSON patches for pod container requests
//! - Answering AdmissionReview requests, always allowing admission
//! - Health checks and observability

pub mod admission;
pub mod health;
pub mod namespace;
pub mod observability;
pub mod patch;
pub mod quantity;
pub mod server;
pub mod transform;

pub use admission::{AdmissionError, AdmissionHandler, AdmissionOutcome};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use namespace::NamespaceFilter;
pub use observability::{StructuredLogger, WebhookMetrics};
pub use quantity::{QuantityError, QuantityFormat, ResourceQuantity};
pub use server::{create_router, AppState};
pub use transform::{OvercommitRatios, ResourceKind};
