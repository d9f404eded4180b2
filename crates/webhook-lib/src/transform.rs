//! Overcommit transform for CPU and memory requests
//!
//! A request is divided by the configured ratio in its native integer unit
//! (milli-CPU or bytes) and then run through a chain of floors, first match
//! wins. The floors are a heuristic for the smallest allocation a container
//! can start with, not a precise bound. An adjustment never grows a request.

use crate::quantity::ResourceQuantity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum CPU kept for requests of at least 0.1 core
pub const MIN_CPU_MILLIS: i64 = 100;

/// Absolute memory floor for requests of at least 4 MiB
pub const MIN_MEMORY_BYTES: i64 = 4 * MIB;

/// Memory kept when a small request scales down to zero bytes
pub const SMALL_MEMORY_FLOOR_BYTES: i64 = MIB;

const MIB: i64 = 1024 * 1024;

/// Resource types the webhook rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

    /// Key used in `resources.requests`
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Overcommit ratios, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvercommitRatios {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for OvercommitRatios {
    fn default() -> Self {
        Self {
            cpu: 1.5,
            memory: 1.5,
        }
    }
}

impl OvercommitRatios {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    pub fn ratio(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
        }
    }

    /// Adjust a parsed request, keeping the original quantity's format.
    /// Returns `None` when the request stays as it is.
    pub fn adjust(
        &self,
        kind: ResourceKind,
        original: &ResourceQuantity,
    ) -> Option<ResourceQuantity> {
        adjust_quantity(kind, original, self.ratio(kind))
    }
}

/// Adjust a quantity of the given kind by `ratio`
pub fn adjust_quantity(
    kind: ResourceKind,
    original: &ResourceQuantity,
    ratio: f64,
) -> Option<ResourceQuantity> {
    match kind {
        ResourceKind::Cpu => adjust_cpu_millis(original.milli_value(), ratio)
            .map(|millis| ResourceQuantity::from_milli(millis, original.format())),
        ResourceKind::Memory => adjust_memory_bytes(original.value(), ratio)
            .map(|bytes| ResourceQuantity::from_value(bytes, original.format())),
    }
}

/// Adjust a CPU request expressed in milli-cores
pub fn adjust_cpu_millis(original: i64, ratio: f64) -> Option<i64> {
    let candidate = scale_down(original, ratio)?;

    let adjusted = if candidate < MIN_CPU_MILLIS && original >= MIN_CPU_MILLIS {
        MIN_CPU_MILLIS
    } else if candidate == 0 {
        (original / 10).max(1)
    } else {
        candidate
    };

    changed(original, adjusted)
}

/// Adjust a memory request expressed in bytes
pub fn adjust_memory_bytes(original: i64, ratio: f64) -> Option<i64> {
    let candidate = scale_down(original, ratio)?;
    let tenth = original / 10;

    let adjusted = if candidate < tenth && original >= MIN_MEMORY_BYTES {
        tenth
    } else if candidate < MIN_MEMORY_BYTES && original >= MIN_MEMORY_BYTES {
        MIN_MEMORY_BYTES
    } else if candidate == 0 {
        SMALL_MEMORY_FLOOR_BYTES
    } else {
        candidate
    };

    changed(original, adjusted)
}

/// `floor(original / ratio)`, or `None` when nothing should be touched
fn scale_down(original: i64, ratio: f64) -> Option<i64> {
    if original <= 0 || !ratio.is_finite() || ratio <= 1.0 {
        return None;
    }
    // `as` truncates toward zero and saturates
    Some((original as f64 / ratio) as i64)
}

/// A floor above the request itself leaves the request as it was
fn changed(original: i64, adjusted: i64) -> Option<i64> {
    (adjusted < original).then_some(adjusted)
}
