//! External interfaces of the autoscaler: the metrics store (read) and the
//! cluster orchestrator (write), plus the raw observation types that cross
//! that boundary. Implementations of the two traits live in
//! `autoscaler-collector-http`; this crate holds the contract and an
//! in-memory mock used by tests and local runs.

use autoscaler_common::{Result, RunnerError};
use std::time::Duration;

#[cfg(feature = "mock")]
pub mod mock;
pub mod retry;

/// One tick's workload observation for a single model. Validity is checked
/// by [`WorkloadObservation::validate`]; invalid ticks must be dropped by
/// the caller before tuning.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkloadObservation {
    /// Arrival rate, requests per minute.
    pub arrival_rate_per_min: f64,
    pub avg_input_tokens: f64,
    pub avg_output_tokens: f64,
    pub observed_ttft_ms: f64,
    pub observed_itl_ms: f64,
    pub max_batch_size: usize,
    pub current_replicas: u32,
}

impl WorkloadObservation {
    pub fn validate(&self) -> Result<()> {
        let checks: &[(bool, &str)] = &[
            (self.arrival_rate_per_min.is_finite() && self.arrival_rate_per_min > 0.0, "arrival rate must be > 0"),
            (self.avg_input_tokens.is_finite() && self.avg_input_tokens > 0.0, "avg input tokens must be > 0"),
            (self.avg_output_tokens.is_finite() && self.avg_output_tokens > 0.0, "avg output tokens must be > 0"),
            (self.observed_ttft_ms.is_finite() && self.observed_ttft_ms > 0.0, "observed TTFT must be > 0"),
            (self.observed_itl_ms.is_finite() && self.observed_itl_ms > 0.0, "observed ITL must be > 0"),
            (self.max_batch_size >= 1, "max batch size must be >= 1"),
        ];
        for (ok, msg) in checks {
            if !ok {
                return Err(RunnerError::InvalidObservation(msg.to_string()));
            }
        }
        Ok(())
    }
}

/// A per-replica saturation sample. Missing fields default to 0 with a
/// warning at the collection boundary, never at construction time, so
/// this type itself carries no defaulting logic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicaSaturationSample {
    pub pod: String,
    pub variant: String,
    pub accelerator: String,
    pub unit_cost: Option<f64>,
    pub kv_cache_usage: f64,
    pub waiting_queue_len: u32,
}

impl ReplicaSaturationSample {
    /// Fill in the "unknown"/0 placeholders for samples with a missing
    /// accelerator label or non-finite usage reading.
    pub fn normalized(mut self) -> Self {
        if self.accelerator.trim().is_empty() {
            tracing::warn!(pod = %self.pod, variant = %self.variant, "accelerator label missing, using 'unknown'");
            self.accelerator = "unknown".to_string();
        }
        if !self.kv_cache_usage.is_finite() {
            tracing::warn!(pod = %self.pod, "kv_cache_usage missing or non-finite, defaulting to 0");
            self.kv_cache_usage = 0.0;
        }
        self
    }
}

/// Everything collected for one model in one reconcile tick.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectedMetrics {
    pub observation: Option<WorkloadObservation>,
    pub saturation: Vec<ReplicaSaturationSample>,
}

/// The metrics-store read side. A 5s per-query timeout applies inside
/// implementations, capped by the caller's deadline; the two underlying
/// queries (KV usage, queue length) must both complete before `collect`
/// returns.
pub trait MetricsCollector: Send + Sync {
    fn collect(&self, model: &str, namespace: &str, deadline: Duration) -> Result<CollectedMetrics>;
}

/// The orchestrator write side. Scaling to 0 is only honoured when the
/// deployment policy allows it; callers floor at 1 otherwise.
pub trait OrchestratorClient: Send + Sync {
    fn set_desired_replicas(&self, namespace: &str, variant: &str, count: u32) -> Result<()>;
}

/// A Prometheus-style label value validator: `^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$`,
/// length <= 63.
pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() || value.len() > 63 {
        return false;
    }
    let bytes = value.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_alphanumeric();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| is_alnum(b) || b == b'.' || b == b'_' || b == b'-')
}
