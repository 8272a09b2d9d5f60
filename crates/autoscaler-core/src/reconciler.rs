//! Ties the queue model, tuner, capacity analyzer, optimizer, and
//! arbitrator into the per-model reconcile cycle.

use crate::arbitrator::Arbitrator;
use crate::capacity::CapacityAnalyzer;
use crate::model::{Action, ModelAnalysis, ServiceParameters, VariantDecision};
use crate::optimizer::{ModelLoad, Optimizer, VariantCandidate};
use crate::tuner::{Environment, ExpectedObservations, PercentChange, Tuner};
use autoscaler_collector::{CollectedMetrics, MetricsCollector, OrchestratorClient};
use autoscaler_common::config::{AutoscalerConfig, SloTarget};
use nalgebra::SMatrix;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A model's per-accelerator-variant static shape: batch size and capacity
/// ceiling. Cost and tuned parameters are looked up through config / the
/// tuner at cycle time.
#[derive(Debug, Clone)]
pub struct VariantSpec {
    pub variant: String,
    pub accelerator: String,
    pub max_batch: usize,
    pub max_replicas: u32,
}

/// Health surface for one model, reported to callers and the `/status`
/// endpoint. Each model gets its own status condition, independent of
/// the others.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelStatus {
    pub healthy: bool,
    pub reason: Option<String>,
}

impl ModelStatus {
    fn healthy() -> Self {
        Self { healthy: true, reason: None }
    }

    fn degraded(reason: impl Into<String>) -> Self {
        Self { healthy: false, reason: Some(reason.into()) }
    }
}

/// Long-lived per-model state: the tuner (X, P), dedup cache, and the
/// transient-delay gate clock. Owned by a single model's reconcile task
/// and never shared across models.
pub struct ModelHandle {
    pub name: String,
    pub namespace: String,
    pub variants: Vec<VariantSpec>,
    tuner: Tuner,
    current_replicas: BTreeMap<String, u32>,
    last_emitted: HashMap<String, u32>,
    last_replica_change_at: Option<Instant>,
    status: ModelStatus,
}

impl ModelHandle {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        variants: Vec<VariantSpec>,
        initial_params: ServiceParameters,
        bounds: crate::model::ParamBounds,
        environment: Environment,
        expected: ExpectedObservations,
        tuner_config: autoscaler_common::config::TunerConfig,
    ) -> Self {
        let tuner = Tuner::new(
            initial_params,
            SMatrix::<f64, 4, 4>::identity(),
            bounds,
            environment,
            expected,
            PercentChange::default(),
            tuner_config,
        );
        let current_replicas = variants.iter().map(|v| (v.variant.clone(), 1)).collect();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            variants,
            tuner,
            current_replicas,
            last_emitted: HashMap::new(),
            last_replica_change_at: None,
            status: ModelStatus::healthy(),
        }
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn params(&self) -> ServiceParameters {
        self.tuner.params()
    }
}

pub struct Reconciler<C: MetricsCollector + ?Sized, O: OrchestratorClient + ?Sized> {
    collector: Arc<C>,
    orchestrator: Arc<O>,
    retry: autoscaler_collector::retry::RetryPolicy,
}

impl<C: MetricsCollector + ?Sized, O: OrchestratorClient + ?Sized> Reconciler<C, O> {
    pub fn new(collector: Arc<C>, orchestrator: Arc<O>) -> Self {
        Self { collector, orchestrator, retry: autoscaler_collector::retry::RetryPolicy::default() }
    }

    /// One full reconcile cycle for one model: collect metrics, check SLO
    /// config, run capacity analysis, run the tuner and optimizer when
    /// there's a valid observation, compute capacity targets, arbitrate,
    /// emit deduped changes, and report status.
    pub fn reconcile(&self, handle: &mut ModelHandle, config: &AutoscalerConfig, deadline: Duration) -> ModelStatus {
        let collected = match self.retry.run(|| self.collector.collect(&handle.name, &handle.namespace, deadline)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(model = %handle.name, error = %e, "metrics collection failed, skipping cycle");
                return handle.status.clone();
            }
        };

        let slo = match config.slo_for(&handle.name) {
            Some(s) => s,
            None => {
                let status = ModelStatus::degraded("no SLO configured for model");
                handle.status = status.clone();
                return status;
            }
        };

        let saturation: Vec<_> = collected.saturation.iter().cloned().map(|s| s.normalized()).collect();
        let capacity_analyzer = CapacityAnalyzer::new(config.capacity);
        let analysis = capacity_analyzer.analyze(&saturation, config.default_variant_cost);

        let valid_observation = collected.observation.and_then(|o| o.validate().ok().map(|_| o));

        let tuned_params = match valid_observation {
            Some(obs) => self.run_tuner_and_optimizer(handle, &obs, &analysis, config, &slo),
            None => {
                tracing::debug!(model = %handle.name, "no valid observation this cycle, capacity-only");
                None
            }
        };

        let ready_replicas: BTreeMap<String, u32> = handle
            .variants
            .iter()
            .map(|v| {
                let count = analysis.variants.get(&v.variant).map(|va| va.replica_count as u32).unwrap_or_else(|| {
                    handle.current_replicas.get(&v.variant).copied().unwrap_or(0)
                });
                (v.variant.clone(), count)
            })
            .collect();

        let capacity_targets = capacity_analyzer.calculate_targets(
            &analysis,
            &ready_replicas,
            &handle.current_replicas,
            &HashMap::new(),
        );

        let model_targets = tuned_params.clone().unwrap_or_else(|| handle.current_replicas.clone());

        let arbitrator = Arbitrator::new();
        let mut decisions = Vec::new();
        for variant in &handle.variants {
            let current = handle.current_replicas.get(&variant.variant).copied().unwrap_or(0);
            let capacity_target = capacity_targets.get(&variant.variant).copied().unwrap_or(current);
            let model_target = model_targets.get(&variant.variant).copied().unwrap_or(current);
            let decision = arbitrator.arbitrate(&variant.variant, current, capacity_target, model_target, analysis.scale_down_safe);
            decisions.push(decision);
        }

        self.emit(handle, &decisions, config, &ready_replicas);

        let status = ModelStatus::healthy();
        handle.status = status.clone();
        status
    }

    fn run_tuner_and_optimizer(
        &self,
        handle: &mut ModelHandle,
        obs: &autoscaler_collector::WorkloadObservation,
        analysis: &ModelAnalysis,
        config: &AutoscalerConfig,
        slo: &SloTarget,
    ) -> Option<BTreeMap<String, u32>> {
        let gated = handle
            .last_replica_change_at
            .map(|t| t.elapsed() < Duration::from_secs(config.transient_delay_seconds))
            .unwrap_or(false);

        let params = if gated {
            tracing::debug!(model = %handle.name, "transient-delay gate active, skipping tuner update");
            handle.tuner.params()
        } else {
            let env = Environment {
                max_batch: obs.max_batch_size,
                avg_input_tokens: obs.avg_input_tokens,
                avg_output_tokens: obs.avg_output_tokens,
                arrival_rate_per_sec: obs.arrival_rate_per_min / 60.0,
            };
            if let Err(e) = handle.tuner.set_environment(env) {
                tracing::warn!(model = %handle.name, error = %e, "invalid environment, keeping prior tuner params");
            }
            let result = handle.tuner.run(obs.observed_ttft_ms, obs.observed_itl_ms);
            if result.validation_failed {
                tracing::warn!(model = %handle.name, reason = ?result.reason, nis = result.nis, "tuner update rejected");
            }
            result.params
        };

        let candidates: Vec<VariantCandidate> = handle
            .variants
            .iter()
            .map(|v| {
                let accelerator = analysis.variants.get(&v.variant).map(|va| va.accelerator.clone()).unwrap_or_else(|| "unknown".to_string());
                VariantCandidate {
                    variant: v.variant.clone(),
                    params,
                    max_batch: v.max_batch,
                    unit_cost: config.accelerator_cost(&accelerator),
                    max_replicas: v.max_replicas,
                }
            })
            .collect();

        let load = ModelLoad {
            lambda_per_sec: obs.arrival_rate_per_min / 60.0,
            avg_input_tokens: obs.avg_input_tokens,
            avg_output_tokens: obs.avg_output_tokens,
        };
        let total_capacity = handle.variants.iter().map(|v| v.max_replicas).sum();
        let outcome = Optimizer::new().optimize(&candidates, load, *slo, total_capacity);
        if outcome.capacity_exhausted {
            tracing::warn!(model = %handle.name, reason = ?outcome.reason, "optimizer could not find a feasible placement, holding previous targets");
            return Some(handle.current_replicas.clone());
        }
        Some(outcome.targets)
    }

    fn emit(&self, handle: &mut ModelHandle, decisions: &[VariantDecision], config: &AutoscalerConfig, ready_replicas: &BTreeMap<String, u32>) {
        for decision in decisions {
            let already_emitted = handle.last_emitted.get(&decision.variant).copied();
            if already_emitted == Some(decision.target_replicas) {
                continue;
            }
            let target = if decision.target_replicas == 0 && !config.scale_to_zero { 1 } else { decision.target_replicas };
            let accelerator = handle
                .variants
                .iter()
                .find(|v| v.variant == decision.variant)
                .map(|v| v.accelerator.as_str())
                .unwrap_or("unknown");
            let direction = match decision.action {
                Action::ScaleUp => "up",
                Action::ScaleDown => "down",
                Action::NoChange => "none",
            };
            match self.retry.run(|| self.orchestrator.set_desired_replicas(&handle.namespace, &decision.variant, target)) {
                Ok(()) => {
                    let changed = handle.current_replicas.get(&decision.variant).copied() != Some(target);
                    handle.current_replicas.insert(decision.variant.clone(), target);
                    handle.last_emitted.insert(decision.variant.clone(), target);
                    if changed {
                        handle.last_replica_change_at = Some(Instant::now());
                    }
                    autoscaler_obs::record_scaling_operation(autoscaler_obs::ScalingOperation {
                        variant: &decision.variant,
                        namespace: &handle.namespace,
                        accelerator,
                        direction,
                        reason: &decision.reason,
                    });
                    let ready = ready_replicas.get(&decision.variant).copied().unwrap_or(target);
                    autoscaler_obs::record_replica_state(&decision.variant, &handle.namespace, target, ready);
                    tracing::info!(model = %handle.name, variant = %decision.variant, target, reason = %decision.reason, "emitted desired replicas");
                }
                Err(e) => {
                    tracing::warn!(model = %handle.name, variant = %decision.variant, error = %e, "failed to emit desired replicas");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_collector::mock::{MockMetricsCollector, MockOrchestratorClient};
    use autoscaler_collector::{ReplicaSaturationSample, WorkloadObservation};
    use crate::model::ParamBounds;

    fn bounds() -> ParamBounds {
        ParamBounds { alpha: (1.0, 20.0), beta: (0.5, 10.0), gamma: (2.0, 50.0), delta: (0.01, 1.0) }
    }

    fn handle() -> ModelHandle {
        ModelHandle::new(
            "model-a",
            "ns",
            vec![VariantSpec { variant: "v1".into(), accelerator: "a100".into(), max_batch: 8, max_replicas: 10 }],
            ServiceParameters { alpha: 5.0, beta: 2.5, gamma: 10.0, delta: 0.15 },
            bounds(),
            Environment { max_batch: 8, avg_input_tokens: 100.0, avg_output_tokens: 200.0, arrival_rate_per_sec: 1.0 },
            ExpectedObservations { ttft_ms: 186.7, itl_ms: 14.9 },
            autoscaler_common::config::TunerConfig::default(),
        )
    }

    #[test]
    fn missing_slo_degrades_model_only() {
        let collector = Arc::new(MockMetricsCollector::new());
        collector.set(
            "model-a",
            "ns",
            CollectedMetrics {
                observation: Some(WorkloadObservation {
                    arrival_rate_per_min: 60.0,
                    avg_input_tokens: 100.0,
                    avg_output_tokens: 200.0,
                    observed_ttft_ms: 186.7,
                    observed_itl_ms: 14.9,
                    max_batch_size: 8,
                    current_replicas: 1,
                }),
                saturation: vec![],
            },
        );
        let orchestrator = Arc::new(MockOrchestratorClient::new());
        let reconciler = Reconciler::new(collector, orchestrator);
        let mut h = handle();
        let config = AutoscalerConfig::default();
        let status = reconciler.reconcile(&mut h, &config, Duration::from_secs(5));
        assert!(!status.healthy);
        assert!(status.reason.unwrap().contains("SLO"));
    }

    #[test]
    fn capacity_only_path_runs_without_valid_observation() {
        let collector = Arc::new(MockMetricsCollector::new());
        collector.set(
            "model-a",
            "ns",
            CollectedMetrics {
                observation: None,
                saturation: vec![ReplicaSaturationSample {
                    pod: "p0".into(),
                    variant: "v1".into(),
                    accelerator: "a100".into(),
                    unit_cost: Some(10.0),
                    kv_cache_usage: 0.95,
                    waiting_queue_len: 0,
                }],
            },
        );
        let orchestrator = Arc::new(MockOrchestratorClient::new());
        let reconciler = Reconciler::new(collector, orchestrator.clone());
        let mut h = handle();
        let mut config = AutoscalerConfig::default();
        config.slo_classes.insert("model-a".to_string(), SloTarget { ttft_ms: 500.0, itl_ms: 50.0 });
        let status = reconciler.reconcile(&mut h, &config, Duration::from_secs(5));
        assert!(status.healthy);
    }

    #[test]
    fn repeated_unchanged_target_is_not_re_emitted() {
        let collector = Arc::new(MockMetricsCollector::new());
        collector.set(
            "model-a",
            "ns",
            CollectedMetrics {
                observation: None,
                saturation: vec![ReplicaSaturationSample {
                    pod: "p0".into(),
                    variant: "v1".into(),
                    accelerator: "a100".into(),
                    unit_cost: Some(10.0),
                    kv_cache_usage: 0.1,
                    waiting_queue_len: 0,
                }],
            },
        );
        let orchestrator = Arc::new(MockOrchestratorClient::new());
        let reconciler = Reconciler::new(collector, orchestrator.clone());
        let mut h = handle();
        let mut config = AutoscalerConfig::default();
        config.slo_classes.insert("model-a".to_string(), SloTarget { ttft_ms: 500.0, itl_ms: 50.0 });
        reconciler.reconcile(&mut h, &config, Duration::from_secs(5));
        let first_count = orchestrator.emitted().len();
        reconciler.reconcile(&mut h, &config, Duration::from_secs(5));
        let second_count = orchestrator.emitted().len();
        assert_eq!(first_count, second_count);
    }
}
