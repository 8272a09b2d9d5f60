//! Long-lived configuration: reconcile cadence, capacity thresholds, tuner
//! noise model, SLO classes, and the accelerator cost catalog.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Per-(model, SLO class) latency targets, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct SloTarget {
    pub ttft_ms: f64,
    pub itl_ms: f64,
}

/// Capacity thresholds and triggers shared by the capacity analyzer.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct CapacityScalingConfig {
    pub kv_cache_threshold: f64,
    pub queue_length_threshold: f64,
    pub kv_spare_trigger: f64,
    pub queue_spare_trigger: f64,
    pub min_non_saturated_replicas_for_scale_down: usize,
}

impl Default for CapacityScalingConfig {
    fn default() -> Self {
        Self {
            kv_cache_threshold: 0.9,
            queue_length_threshold: 100.0,
            kv_spare_trigger: 0.1,
            queue_spare_trigger: 10.0,
            min_non_saturated_replicas_for_scale_down: 2,
        }
    }
}

/// Noise-model knobs for the tuner's EKF wiring.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct TunerConfig {
    pub gamma_factor: f64,
    pub error_level: f64,
    pub t_percentile: f64,
    pub max_nis: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            gamma_factor: 1.0,
            error_level: 0.05,
            t_percentile: 1.96,
            max_nis: 7.378,
        }
    }
}

/// Static per-accelerator-variant shape used to build a [`ModelSpec`]'s
/// fleet entry. Cost is looked up through `accelerator_cost`, not stored
/// here, so the catalog stays the single source of truth.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    pub variant: String,
    pub accelerator: String,
    pub max_batch: usize,
    pub max_replicas: u32,
}

/// Initial (α, β, γ, δ) guess the tuner starts from for a model.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct ServiceParamsConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

/// Per-dimension `[min, max]` clamp, mirrors `autoscaler_core::model::ParamBounds`
/// at the config layer (no core type in this crate by design).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ParamBoundsConfig {
    pub alpha: (f64, f64),
    pub beta: (f64, f64),
    pub gamma: (f64, f64),
    pub delta: (f64, f64),
}

/// One model's static fleet entry: which variants exist, and the tuner's
/// starting point for this model. Intentionally not a CRD -- the CLI reads
/// this from the same YAML as the rest of [`AutoscalerConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    pub namespace: String,
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub initial_params: ServiceParamsConfig,
    pub bounds: ParamBoundsConfig,
    #[serde(default = "default_avg_input_tokens")]
    pub avg_input_tokens: f64,
    #[serde(default = "default_avg_output_tokens")]
    pub avg_output_tokens: f64,
    #[serde(default = "default_expected_ttft")]
    pub expected_ttft_ms: f64,
    #[serde(default = "default_expected_itl")]
    pub expected_itl_ms: f64,
}

fn default_avg_input_tokens() -> f64 {
    100.0
}
fn default_avg_output_tokens() -> f64 {
    200.0
}
fn default_expected_ttft() -> f64 {
    200.0
}
fn default_expected_itl() -> f64 {
    20.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(with = "duration_secs", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
    #[serde(default = "default_transient_delay")]
    pub transient_delay_seconds: u64,
    #[serde(default)]
    pub capacity: CapacityScalingConfig,
    #[serde(default)]
    pub tuner: TunerConfig,
    #[serde(default = "default_variant_cost")]
    pub default_variant_cost: f64,
    #[serde(default)]
    pub scale_to_zero: bool,
    /// (model, class) -> SLO target.
    #[serde(default)]
    pub slo_classes: HashMap<String, SloTarget>,
    /// accelerator name -> unit cost.
    #[serde(default)]
    pub accelerator_cost: HashMap<String, f64>,
    /// Static fleet membership: which models/variants this process manages.
    #[serde(default)]
    pub fleet: Vec<ModelSpec>,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_transient_delay() -> u64 {
    120
}
fn default_variant_cost() -> f64 {
    10.0
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
            transient_delay_seconds: default_transient_delay(),
            capacity: CapacityScalingConfig::default(),
            tuner: TunerConfig::default(),
            default_variant_cost: default_variant_cost(),
            scale_to_zero: false,
            slo_classes: HashMap::new(),
            accelerator_cost: HashMap::new(),
            fleet: Vec::new(),
        }
    }
}

impl AutoscalerConfig {
    /// Load from `AUTOSCALER_CONFIG` (a YAML file) if set, falling back to
    /// defaults with individual env var overrides layered on top.
    pub fn load() -> Self {
        let mut cfg = if let Ok(path) = env::var("AUTOSCALER_CONFIG") {
            match std::fs::read_to_string(&path) {
                Ok(text) => serde_yaml::from_str::<AutoscalerConfig>(&text).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        };

        if let Some(v) = env::var("AUTOSCALER_RECONCILE_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()) {
            cfg.reconcile_interval = Duration::from_secs(v);
        }
        if let Some(v) = env::var("AUTOSCALER_TRANSIENT_DELAY_SECS").ok().and_then(|v| v.parse().ok()) {
            cfg.transient_delay_seconds = v;
        }
        if let Some(v) = env::var("AUTOSCALER_DEFAULT_VARIANT_COST").ok().and_then(|v| v.parse().ok()) {
            cfg.default_variant_cost = v;
        }
        if let Ok(v) = env::var("AUTOSCALER_SCALE_TO_ZERO") {
            cfg.scale_to_zero = v == "1" || v.eq_ignore_ascii_case("true");
        }
        cfg
    }

    pub fn accelerator_cost(&self, accelerator: &str) -> f64 {
        self.accelerator_cost
            .get(accelerator)
            .copied()
            .unwrap_or(self.default_variant_cost)
    }

    pub fn slo_for(&self, model: &str) -> Option<SloTarget> {
        self.slo_classes.get(model).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_defaults() {
        let cfg = AutoscalerConfig::default();
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(60));
        assert_eq!(cfg.transient_delay_seconds, 120);
        assert_eq!(cfg.capacity.min_non_saturated_replicas_for_scale_down, 2);
        assert_eq!(cfg.default_variant_cost, 10.0);
        assert!(!cfg.scale_to_zero);
        assert_eq!(cfg.tuner.max_nis, 7.378);
    }

    #[test]
    fn unknown_accelerator_falls_back_to_default_cost() {
        let cfg = AutoscalerConfig::default();
        assert_eq!(cfg.accelerator_cost("unknown"), 10.0);
    }
}
