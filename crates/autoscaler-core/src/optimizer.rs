//! Cost-minimising placement across accelerator variants: given a model's
//! current service parameters and arrival rate, decide how many replicas
//! of each accelerator variant to run. Implemented as a concrete greedy
//! placement using the same [`crate::analyzer::QueueAnalyzer`] the tuner
//! observes through.

use crate::analyzer::QueueAnalyzer;
use crate::model::ServiceParameters;
use autoscaler_common::config::SloTarget;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct VariantCandidate {
    pub variant: String,
    pub params: ServiceParameters,
    pub max_batch: usize,
    pub unit_cost: f64,
    pub max_replicas: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelLoad {
    pub lambda_per_sec: f64,
    pub avg_input_tokens: f64,
    pub avg_output_tokens: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub targets: BTreeMap<String, u32>,
    pub capacity_exhausted: bool,
    pub reason: Option<String>,
}

pub struct Optimizer;

impl Optimizer {
    pub fn new() -> Self {
        Self
    }

    /// Per-replica throughput ceiling for a variant at `max_batch`. Replicas
    /// of distinct variants share the aggregate λ weighted by this ceiling.
    fn throughput_ceiling(candidate: &VariantCandidate) -> f64 {
        let n = candidate.max_batch as f64;
        n / ((candidate.params.alpha + candidate.params.beta * n) * 1.0)
    }

    /// Greedily add replicas, cheapest variant first, splitting λ across
    /// currently-placed replicas of each variant equally and across
    /// variants by throughput-ceiling weight, until every variant's share
    /// meets SLO or capacity is exhausted.
    pub fn optimize(
        &self,
        candidates: &[VariantCandidate],
        load: ModelLoad,
        slo: SloTarget,
        total_accelerator_capacity: u32,
    ) -> OptimizerOutcome {
        let mut sorted: Vec<&VariantCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.unit_cost.partial_cmp(&b.unit_cost).unwrap());

        let mut replicas: BTreeMap<String, u32> = BTreeMap::new();
        let mut last_feasible: Option<BTreeMap<String, u32>> = None;

        if sorted.is_empty() {
            return OptimizerOutcome { targets: replicas, capacity_exhausted: true, reason: Some("no candidate variants".into()) };
        }

        let first = sorted[0];
        replicas.insert(first.variant.clone(), 1);

        loop {
            let total_replicas: u32 = replicas.values().sum();
            if total_replicas > total_accelerator_capacity {
                break;
            }

            if self.meets_slo(&sorted, &replicas, load, slo) {
                last_feasible = Some(replicas.clone());
                break;
            }

            if total_replicas >= total_accelerator_capacity {
                break;
            }

            let growable = sorted.iter().find(|c| {
                let current = replicas.get(&c.variant).copied().unwrap_or(0);
                current < c.max_replicas
            });

            match growable {
                Some(c) => {
                    let entry = replicas.entry(c.variant.clone()).or_insert(0);
                    *entry += 1;
                }
                None => break,
            }
        }

        match last_feasible {
            Some(targets) => OptimizerOutcome { targets, capacity_exhausted: false, reason: None },
            None => OptimizerOutcome {
                targets: replicas,
                capacity_exhausted: true,
                reason: Some("capacity-exhausted".to_string()),
            },
        }
    }

    fn meets_slo(&self, candidates: &[&VariantCandidate], replicas: &BTreeMap<String, u32>, load: ModelLoad, slo: SloTarget) -> bool {
        let weights: Vec<(String, f64, u32)> = candidates
            .iter()
            .filter_map(|c| {
                let count = replicas.get(&c.variant).copied().unwrap_or(0);
                if count == 0 {
                    return None;
                }
                Some((c.variant.clone(), Self::throughput_ceiling(c), count))
            })
            .collect();
        let total_weight: f64 = weights.iter().map(|(_, w, n)| w * *n as f64).sum();
        if total_weight <= 0.0 {
            return false;
        }

        for c in candidates {
            let count = replicas.get(&c.variant).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let weight = Self::throughput_ceiling(c);
            let variant_share = load.lambda_per_sec * (weight * count as f64) / total_weight;
            let per_replica_lambda = variant_share / count as f64;

            let analyzer = match QueueAnalyzer::new(c.params, c.max_batch, load.avg_input_tokens, load.avg_output_tokens) {
                Ok(a) => a,
                Err(_) => return false,
            };
            let metrics = match analyzer.analyze(per_replica_lambda) {
                Ok(m) => m,
                Err(_) => return false,
            };
            if metrics.ttft_ms() > slo.ttft_ms || metrics.itl_ms() > slo.itl_ms {
                return false;
            }
        }
        true
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
