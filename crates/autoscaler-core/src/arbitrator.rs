//! Hybrid decision matrix combining capacity and model-based targets into a
//! single emitted decision per variant.

use crate::model::{Action, ProvenanceFlags, VariantDecision};

fn classify(target: u32, current: u32) -> Action {
    if target > current {
        Action::ScaleUp
    } else if target < current {
        Action::ScaleDown
    } else {
        Action::NoChange
    }
}

pub struct Arbitrator;

impl Arbitrator {
    pub fn new() -> Self {
        Self
    }

    /// Decide one variant's outcome from its capacity and model-based
    /// targets against the current replica count. First matching row
    /// wins: capacity veto, then safety block, then capacity-driven
    /// scale-up, then the model-based decision, then no change.
    pub fn arbitrate(
        &self,
        variant: &str,
        current: u32,
        capacity_target: u32,
        model_target: u32,
        scale_down_safe: bool,
    ) -> VariantDecision {
        let capacity_action = classify(capacity_target, current);
        let model_action = classify(model_target, current);

        if capacity_action == Action::ScaleUp && model_action == Action::ScaleDown {
            return VariantDecision {
                variant: variant.to_string(),
                target_replicas: current,
                action: Action::NoChange,
                flags: ProvenanceFlags { safety_override: true, ..Default::default() },
                reason: "capacity veto".to_string(),
            };
        }

        if model_action == Action::ScaleDown && !scale_down_safe {
            return VariantDecision {
                variant: variant.to_string(),
                target_replicas: current,
                action: Action::NoChange,
                flags: ProvenanceFlags { safety_override: true, ..Default::default() },
                reason: "safety block".to_string(),
            };
        }

        if capacity_action == Action::ScaleUp && model_action == Action::NoChange {
            return VariantDecision {
                variant: variant.to_string(),
                target_replicas: capacity_target,
                action: Action::ScaleUp,
                flags: ProvenanceFlags { capacity_based: true, ..Default::default() },
                reason: "capacity-driven scale up".to_string(),
            };
        }

        if model_action == Action::ScaleUp || model_action == Action::ScaleDown {
            return VariantDecision {
                variant: variant.to_string(),
                target_replicas: model_target,
                action: model_action,
                flags: ProvenanceFlags { model_based_decision: true, ..Default::default() },
                reason: "model-based decision".to_string(),
            };
        }

        VariantDecision {
            variant: variant.to_string(),
            target_replicas: current,
            action: Action::NoChange,
            flags: ProvenanceFlags::default(),
            reason: "no change".to_string(),
        }
    }
}

impl Default for Arbitrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_veto_wins_over_model_scale_down() {
        let arb = Arbitrator::new();
        let decision = arb.arbitrate("v", 3, 4, 2, true);
        assert_eq!(decision.target_replicas, 3);
        assert_eq!(decision.action, Action::NoChange);
        assert!(decision.flags.safety_override);
        assert!(decision.reason.contains("capacity veto"));
    }

    #[test]
    fn safety_block_when_scale_down_unsafe() {
        let arb = Arbitrator::new();
        let decision = arb.arbitrate("v", 3, 3, 2, false);
        assert_eq!(decision.target_replicas, 3);
        assert_eq!(decision.action, Action::NoChange);
        assert!(decision.flags.safety_override);
        assert!(decision.reason.contains("safety block"));
    }

    #[test]
    fn capacity_based_scale_up_when_model_has_no_change() {
        let arb = Arbitrator::new();
        let decision = arb.arbitrate("v", 3, 4, 3, true);
        assert_eq!(decision.target_replicas, 4);
        assert_eq!(decision.action, Action::ScaleUp);
        assert!(decision.flags.capacity_based);
    }

    #[test]
    fn model_based_decision_followed_when_not_vetoed() {
        let arb = Arbitrator::new();
        let up = arb.arbitrate("v", 3, 3, 5, true);
        assert_eq!(up.target_replicas, 5);
        assert_eq!(up.action, Action::ScaleUp);
        assert!(up.flags.model_based_decision);

        let down = arb.arbitrate("v", 3, 3, 2, true);
        assert_eq!(down.target_replicas, 2);
        assert_eq!(down.action, Action::ScaleDown);
        assert!(down.flags.model_based_decision);
    }

    #[test]
    fn no_change_when_both_targets_match_current() {
        let arb = Arbitrator::new();
        let decision = arb.arbitrate("v", 3, 3, 3, true);
        assert_eq!(decision.target_replicas, 3);
        assert_eq!(decision.action, Action::NoChange);
        assert!(!decision.flags.safety_override && !decision.flags.capacity_based && !decision.flags.model_based_decision);
    }
}
