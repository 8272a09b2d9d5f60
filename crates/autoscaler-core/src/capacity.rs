//! Safety-first capacity analysis and arbitration input.

use crate::model::{ModelAnalysis, VariantAnalysis};
use autoscaler_collector::ReplicaSaturationSample;
use autoscaler_common::config::CapacityScalingConfig;
use std::collections::{BTreeMap, HashMap};

pub struct CapacityAnalyzer {
    config: CapacityScalingConfig,
}

impl CapacityAnalyzer {
    pub fn new(config: CapacityScalingConfig) -> Self {
        Self { config }
    }

    fn is_saturated(&self, sample: &ReplicaSaturationSample) -> bool {
        sample.kv_cache_usage >= self.config.kv_cache_threshold
            || sample.waiting_queue_len as f64 >= self.config.queue_length_threshold
    }

    /// Aggregate saturation samples across all replicas of all variants for
    /// one model, rolling the per-variant analyses up into a per-model view.
    pub fn analyze(&self, samples: &[ReplicaSaturationSample], default_cost: f64) -> ModelAnalysis {
        let mut by_variant: BTreeMap<String, Vec<&ReplicaSaturationSample>> = BTreeMap::new();
        for s in samples {
            by_variant.entry(s.variant.clone()).or_default().push(s);
        }

        let mut variants = BTreeMap::new();
        let mut total_non_saturated = 0usize;
        let mut weighted_spare_kv = 0.0;
        let mut weighted_spare_queue = 0.0;

        for (variant, pods) in &by_variant {
            let accelerator = pods.first().map(|p| p.accelerator.clone()).unwrap_or_else(|| "unknown".to_string());
            let unit_cost = pods.iter().find_map(|p| p.unit_cost).unwrap_or(default_cost);

            let mut saturated_pods = Vec::new();
            let mut spare_kv_sum = 0.0;
            let mut spare_queue_sum = 0.0;
            let mut non_saturated_count = 0usize;
            let mut max_kv_usage = 0.0_f64;
            let mut max_queue_length = 0.0_f64;

            for sample in pods {
                max_kv_usage = max_kv_usage.max(sample.kv_cache_usage);
                max_queue_length = max_queue_length.max(sample.waiting_queue_len as f64);
                if self.is_saturated(sample) {
                    saturated_pods.push(sample.pod.clone());
                } else {
                    non_saturated_count += 1;
                    spare_kv_sum += self.config.kv_cache_threshold - sample.kv_cache_usage;
                    spare_queue_sum += self.config.queue_length_threshold - sample.waiting_queue_len as f64;
                }
            }

            let mean_spare_kv = if non_saturated_count > 0 { spare_kv_sum / non_saturated_count as f64 } else { 0.0 };
            let mean_spare_queue = if non_saturated_count > 0 { spare_queue_sum / non_saturated_count as f64 } else { 0.0 };

            total_non_saturated += non_saturated_count;
            weighted_spare_kv += spare_kv_sum;
            weighted_spare_queue += spare_queue_sum;

            variants.insert(
                variant.clone(),
                VariantAnalysis {
                    variant: variant.clone(),
                    accelerator,
                    unit_cost,
                    replica_count: pods.len(),
                    saturated_pods,
                    non_saturated_count,
                    mean_spare_kv,
                    mean_spare_queue,
                    max_kv_usage,
                    max_queue_length,
                },
            );
        }

        let mean_spare_kv = if total_non_saturated > 0 { weighted_spare_kv / total_non_saturated as f64 } else { 0.0 };
        let mean_spare_queue = if total_non_saturated > 0 { weighted_spare_queue / total_non_saturated as f64 } else { 0.0 };

        let all_saturated = !variants.is_empty() && total_non_saturated == 0;
        let kv_triggered = mean_spare_kv < self.config.kv_spare_trigger;
        let queue_triggered = mean_spare_queue < self.config.queue_spare_trigger;
        let should_scale_up = all_saturated || kv_triggered || queue_triggered;

        let reason = if all_saturated {
            "every replica saturated, forcing scale-up".to_string()
        } else if should_scale_up {
            match (kv_triggered, queue_triggered) {
                (true, true) => "mean spare KV and queue capacity below trigger".to_string(),
                (true, false) => "mean spare KV capacity below trigger".to_string(),
                (false, true) => "mean spare queue capacity below trigger".to_string(),
                (false, false) => unreachable!(),
            }
        } else {
            "capacity within bounds".to_string()
        };

        let scale_down_safe = self.scale_down_safe(total_non_saturated, weighted_spare_kv, weighted_spare_queue);

        ModelAnalysis { variants, total_non_saturated, mean_spare_kv, mean_spare_queue, should_scale_up, scale_down_safe, reason }
    }

    /// Simulate removing one non-saturated replica by redistributing the
    /// total non-saturated spare load across the remaining replicas, and
    /// check whether spare capacity would stay above trigger.
    fn scale_down_safe(&self, total_non_saturated: usize, weighted_spare_kv: f64, weighted_spare_queue: f64) -> bool {
        if total_non_saturated < self.config.min_non_saturated_replicas_for_scale_down {
            return false;
        }
        let remaining = total_non_saturated - 1;
        if remaining == 0 {
            return false;
        }
        let sim_mean_spare_kv = weighted_spare_kv / remaining as f64;
        let sim_mean_spare_queue = weighted_spare_queue / remaining as f64;
        sim_mean_spare_kv >= self.config.kv_spare_trigger && sim_mean_spare_queue >= self.config.queue_spare_trigger
    }

    /// Compute per-variant target replicas from ready counts, previously
    /// preserved desired counts, and the scale-up/scale-down signal.
    pub fn calculate_targets(
        &self,
        analysis: &ModelAnalysis,
        ready_replicas: &BTreeMap<String, u32>,
        current_replicas: &BTreeMap<String, u32>,
        previously_desired: &HashMap<String, u32>,
    ) -> BTreeMap<String, u32> {
        let mut targets: BTreeMap<String, u32> = ready_replicas.clone();
        let mut preserved: BTreeMap<String, bool> = BTreeMap::new();

        for (variant, &ready) in ready_replicas {
            preserved.insert(variant.clone(), false);
            if let Some(&desired) = previously_desired.get(variant) {
                let current = current_replicas.get(variant).copied().unwrap_or(ready);
                if desired != 0 && desired != current {
                    targets.insert(variant.clone(), desired);
                    preserved.insert(variant.clone(), true);
                }
            }
        }

        if analysis.should_scale_up {
            let candidate = analysis
                .variants
                .iter()
                .filter(|(v, _)| !preserved.get(*v).copied().unwrap_or(false))
                .min_by(|(va, a), (vb, b)| {
                    a.unit_cost.partial_cmp(&b.unit_cost).unwrap().then_with(|| va.cmp(vb))
                });
            if let Some((variant, va)) = candidate {
                let ready = ready_replicas.get(variant).copied().unwrap_or(va.replica_count as u32);
                targets.insert(variant.clone(), ready + 1);
            } else {
                tracing::warn!("capacity: scale-up flagged but all variants preserved");
            }
        } else if analysis.scale_down_safe {
            let candidate = analysis
                .variants
                .iter()
                .filter(|(v, _)| !preserved.get(*v).copied().unwrap_or(false))
                .filter(|(v, _)| ready_replicas.get(*v).copied().unwrap_or(0) > 1)
                .max_by(|(va, a), (vb, b)| {
                    a.unit_cost.partial_cmp(&b.unit_cost).unwrap().then_with(|| vb.cmp(va))
                });
            if let Some((variant, _)) = candidate {
                let ready = ready_replicas.get(variant).copied().unwrap_or(0);
                targets.insert(variant.clone(), ready - 1);
            } else {
                tracing::warn!("capacity: scale-down flagged but all eligible variants preserved");
            }
        }

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pod: &str, variant: &str, kv: f64, queue: u32) -> ReplicaSaturationSample {
        ReplicaSaturationSample {
            pod: pod.into(),
            variant: variant.into(),
            accelerator: "a100".into(),
            unit_cost: None,
            kv_cache_usage: kv,
            waiting_queue_len: queue,
        }
    }

    fn cfg() -> CapacityScalingConfig {
        CapacityScalingConfig {
            kv_cache_threshold: 0.9,
            queue_length_threshold: 100.0,
            kv_spare_trigger: 0.1,
            queue_spare_trigger: 10.0,
            min_non_saturated_replicas_for_scale_down: 2,
        }
    }

    #[test]
    fn capacity_trigger_on_low_spare_kv() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![sample("p0", "v", 0.85, 0), sample("p1", "v", 0.86, 0), sample("p2", "v", 0.87, 0)];
        let analysis = analyzer.analyze(&samples, 10.0);
        assert_eq!(analysis.total_non_saturated, 3);
        assert!(analysis.should_scale_up);
        assert!(analysis.reason.contains("KV"));
    }

    #[test]
    fn all_saturated_forces_scale_up() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![sample("p0", "v", 0.95, 0), sample("p1", "v", 0.96, 0)];
        let analysis = analyzer.analyze(&samples, 10.0);
        assert_eq!(analysis.total_non_saturated, 0);
        assert!(analysis.should_scale_up);
        assert!(!analysis.scale_down_safe);
    }

    #[test]
    fn scale_down_safety_rejection() {
        let mut cfg = cfg();
        cfg.kv_spare_trigger = 0.3;
        let analyzer = CapacityAnalyzer::new(cfg);
        let samples = vec![sample("p0", "v", 0.4, 0), sample("p1", "v", 0.4, 0)];
        let analysis = analyzer.analyze(&samples, 10.0);
        assert!(!analysis.scale_down_safe);
    }

    #[test]
    fn non_saturated_plus_saturated_equals_total() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![sample("p0", "v", 0.95, 0), sample("p1", "v", 0.2, 0), sample("p2", "v", 0.1, 200)];
        let analysis = analyzer.analyze(&samples, 10.0);
        let va = &analysis.variants["v"];
        assert_eq!(va.non_saturated_count + va.saturated_pods.len(), va.replica_count);
    }

    #[test]
    fn scale_down_safe_implies_min_non_saturated() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![sample("p0", "v", 0.1, 0), sample("p1", "v", 0.1, 0), sample("p2", "v", 0.1, 0)];
        let analysis = analyzer.analyze(&samples, 10.0);
        if analysis.scale_down_safe {
            assert!(analysis.total_non_saturated >= cfg().min_non_saturated_replicas_for_scale_down);
        }
    }

    #[test]
    fn capacity_driven_scale_up_picks_cheapest() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![
            sample("a0", "A", 0.85, 0),
            sample("a1", "A", 0.86, 0),
            sample("b0", "B", 0.85, 0),
            sample("b1", "B", 0.86, 0),
        ];
        let mut samples_with_cost = samples;
        samples_with_cost[0].unit_cost = Some(40.0);
        samples_with_cost[1].unit_cost = Some(40.0);
        samples_with_cost[2].unit_cost = Some(23.0);
        samples_with_cost[3].unit_cost = Some(23.0);

        let analysis = analyzer.analyze(&samples_with_cost, 10.0);
        assert!(analysis.should_scale_up);

        let ready: BTreeMap<String, u32> = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let current = ready.clone();
        let targets = analyzer.calculate_targets(&analysis, &ready, &current, &HashMap::new());
        assert_eq!(targets["B"], 3);
        assert_eq!(targets["A"], 2);
    }

    #[test]
    fn preserved_desired_count_is_kept() {
        let analyzer = CapacityAnalyzer::new(cfg());
        let samples = vec![sample("p0", "v", 0.1, 0), sample("p1", "v", 0.1, 0)];
        let analysis = analyzer.analyze(&samples, 10.0);
        let ready: BTreeMap<String, u32> = [("v".to_string(), 2)].into_iter().collect();
        let current = ready.clone();
        let mut previously_desired = HashMap::new();
        previously_desired.insert("v".to_string(), 5);
        let targets = analyzer.calculate_targets(&analysis, &ready, &current, &previously_desired);
        assert_eq!(targets["v"], 5);
    }
}
