//! Shared error taxonomy and configuration for the fleet autoscaler.

pub mod config;

pub type Result<T> = core::result::Result<T, RunnerError>;

/// The six error kinds of the reconcile error taxonomy. Variants carry just
/// enough context to let a reconcile loop decide retry vs. skip vs. degrade.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    /// Timeout or 5xx from the metrics store, or 409/429 from the
    /// orchestrator. Retried with bounded backoff by the caller; this
    /// variant is what's left over once retries are exhausted.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// NaN/Inf, or a required-positive field that isn't. Dropped from
    /// tuning silently; capacity analysis may still proceed.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// NIS over threshold, negative parameter after update, or singular
    /// innovation covariance. The tuner has already unstashed its prior
    /// state by the time this is returned.
    #[error("tuner rejected update: {0}")]
    TunerOutlier(String),

    /// No placement meets the SLO within cluster capacity.
    #[error("infeasible optimization: {0}")]
    InfeasibleOptimization(String),

    /// Missing SLO for a model, malformed catalog, or similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal precondition violated. Fatal to the current cycle; the
    /// process stays up.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RunnerError {
    /// True for kinds that should pause scaling for the affected model and
    /// surface a degraded status condition.
    pub fn degrades_model(&self) -> bool {
        !matches!(self, RunnerError::TransientExternal(_) | RunnerError::InvalidObservation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_model_classification() {
        assert!(!RunnerError::TransientExternal("x".into()).degrades_model());
        assert!(!RunnerError::InvalidObservation("x".into()).degrades_model());
        assert!(RunnerError::TunerOutlier("x".into()).degrades_model());
        assert!(RunnerError::InfeasibleOptimization("x".into()).degrades_model());
        assert!(RunnerError::Configuration("x".into()).degrades_model());
        assert!(RunnerError::Internal("x".into()).degrades_model());
    }
}
