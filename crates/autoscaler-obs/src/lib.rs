//! Observability: counters and gauges for scaling operations and replica
//! state.

use once_cell::sync::Lazy;
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts};

static SCALING_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        Opts::new("autoscaler_scaling_operations_total", "Scaling operations emitted to the orchestrator"),
        &["variant", "namespace", "accelerator", "direction", "reason"]
    )
    .unwrap()
});

static DESIRED_REPLICAS: Lazy<IntGaugeVec> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "autoscaler_desired_replicas",
        "Desired replica count last emitted for a variant",
        &["variant", "namespace"]
    )
    .unwrap()
});

static CURRENT_REPLICAS: Lazy<IntGaugeVec> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "autoscaler_current_replicas",
        "Last observed ready replica count for a variant",
        &["variant", "namespace"]
    )
    .unwrap()
});

static REPLICA_RATIO: Lazy<GaugeVec> = Lazy::new(|| {
    prometheus::register_gauge_vec!(
        "autoscaler_replica_ratio",
        "current_replicas / desired_replicas for a variant, 1.0 when converged",
        &["variant", "namespace"]
    )
    .unwrap()
});

static MODEL_HEALTHY: Lazy<IntGaugeVec> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "autoscaler_model_healthy",
        "1 if the model's status condition is healthy, 0 if degraded",
        &["model"]
    )
    .unwrap()
});

/// Touch every static to force Prometheus registration at startup.
pub fn init() {
    let _ = &*SCALING_OPERATIONS_TOTAL;
    let _ = &*DESIRED_REPLICAS;
    let _ = &*CURRENT_REPLICAS;
    let _ = &*REPLICA_RATIO;
    let _ = &*MODEL_HEALTHY;
}

pub struct ScalingOperation<'a> {
    pub variant: &'a str,
    pub namespace: &'a str,
    pub accelerator: &'a str,
    pub direction: &'a str,
    pub reason: &'a str,
}

pub fn record_scaling_operation(op: ScalingOperation<'_>) {
    SCALING_OPERATIONS_TOTAL
        .with_label_values(&[op.variant, op.namespace, op.accelerator, op.direction, op.reason])
        .inc();
}

pub fn record_replica_state(variant: &str, namespace: &str, desired: u32, current: u32) {
    DESIRED_REPLICAS.with_label_values(&[variant, namespace]).set(desired as i64);
    CURRENT_REPLICAS.with_label_values(&[variant, namespace]).set(current as i64);
    let ratio = if desired == 0 { 1.0 } else { current as f64 / desired as f64 };
    REPLICA_RATIO.with_label_values(&[variant, namespace]).set(ratio);
}

pub fn record_model_health(model: &str, healthy: bool) {
    MODEL_HEALTHY.with_label_values(&[model]).set(if healthy { 1 } else { 0 });
}
