//! The core data model: service parameters, per-tick analyses, and the
//! arbitration result.

use std::collections::BTreeMap;

/// Decode (α, β) and prefill (γ, δ) service-rate parameters. All four must
/// be strictly positive and bounded within a configurable `[min, max]` per
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServiceParameters {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl ServiceParameters {
    pub fn all_positive(&self) -> bool {
        self.alpha > 0.0 && self.beta > 0.0 && self.gamma > 0.0 && self.delta > 0.0
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.alpha, self.beta, self.gamma, self.delta]
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Self { alpha: a[0], beta: a[1], gamma: a[2], delta: a[3] }
    }
}

/// Per-dimension `[min, max]` clamp for the tuner's bounded-state mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub alpha: (f64, f64),
    pub beta: (f64, f64),
    pub gamma: (f64, f64),
    pub delta: (f64, f64),
}

impl ParamBounds {
    pub fn as_arrays(&self) -> ([f64; 4], [f64; 4]) {
        (
            [self.alpha.0, self.beta.0, self.gamma.0, self.delta.0],
            [self.alpha.1, self.beta.1, self.gamma.1, self.delta.1],
        )
    }

    pub fn contains(&self, x: &ServiceParameters) -> bool {
        x.alpha >= self.alpha.0 && x.alpha <= self.alpha.1
            && x.beta >= self.beta.0 && x.beta <= self.beta.1
            && x.gamma >= self.gamma.0 && x.gamma <= self.gamma.1
            && x.delta >= self.delta.0 && x.delta <= self.delta.1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Action {
    ScaleUp,
    ScaleDown,
    NoChange,
}

/// Provenance flags attached to an emitted [`VariantDecision`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProvenanceFlags {
    pub capacity_based: bool,
    pub model_based_decision: bool,
    pub safety_override: bool,
}

/// A variant's identity and cost as carried through capacity analysis,
/// optimization, and arbitration.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantState {
    pub variant: String,
    pub accelerator: String,
    pub unit_cost: f64,
    pub current_replicas: u32,
    pub ready_replicas: u32,
}

/// Per-variant aggregation of saturation samples for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantAnalysis {
    pub variant: String,
    pub accelerator: String,
    pub unit_cost: f64,
    pub replica_count: usize,
    pub saturated_pods: Vec<String>,
    pub non_saturated_count: usize,
    pub mean_spare_kv: f64,
    pub mean_spare_queue: f64,
    pub max_kv_usage: f64,
    pub max_queue_length: f64,
}

impl VariantAnalysis {
    pub fn total_replicas(&self) -> usize {
        self.replica_count
    }
}

/// Aggregates [`VariantAnalysis`] across variants for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnalysis {
    pub variants: BTreeMap<String, VariantAnalysis>,
    pub total_non_saturated: usize,
    pub mean_spare_kv: f64,
    pub mean_spare_queue: f64,
    pub should_scale_up: bool,
    pub scale_down_safe: bool,
    pub reason: String,
}

/// The emitted result of arbitration for one variant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VariantDecision {
    pub variant: String,
    pub target_replicas: u32,
    pub action: Action,
    pub flags: ProvenanceFlags,
    pub reason: String,
}
