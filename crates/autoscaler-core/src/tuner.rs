//! Wires the EKF primitive around the queue analyzer to estimate
//! (α, β, γ, δ) online from measured TTFT/ITL.

use crate::analyzer::QueueAnalyzer;
use crate::ekf::ExtendedKalmanFilter;
use crate::model::{ParamBounds, ServiceParameters};
use autoscaler_common::config::TunerConfig;
use autoscaler_common::{Result, RunnerError};
use nalgebra::{SMatrix, SVector};
use std::sync::{Arc, RwLock};

/// The per-tick inputs the observation closure needs that aren't part of
/// the estimated state: a small bundle of the analyzer's environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub max_batch: usize,
    pub avg_input_tokens: f64,
    pub avg_output_tokens: f64,
    pub arrival_rate_per_sec: f64,
}

impl Environment {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch < 1 {
            return Err(RunnerError::InvalidObservation("max batch must be >= 1".into()));
        }
        if self.avg_input_tokens <= 0.0 || self.avg_output_tokens <= 0.0 {
            return Err(RunnerError::InvalidObservation("average token counts must be > 0".into()));
        }
        if !self.arrival_rate_per_sec.is_finite() || self.arrival_rate_per_sec < 0.0 {
            return Err(RunnerError::InvalidObservation("arrival rate must be finite and >= 0".into()));
        }
        Ok(())
    }
}

/// Expected (TTFT, ITL) magnitudes used to scale the measurement-noise
/// covariance R.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedObservations {
    pub ttft_ms: f64,
    pub itl_ms: f64,
}

/// Per-parameter fraction of allowed drift per tick, used to build the
/// process-noise covariance Q (`Q_ii = (PercentChange_i . X_i)^2`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentChange {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl Default for PercentChange {
    fn default() -> Self {
        Self { alpha: 0.05, beta: 0.05, gamma: 0.05, delta: 0.05 }
    }
}

#[derive(Debug, Clone)]
pub struct TunerResult {
    pub params: ServiceParameters,
    pub innovation: [f64; 2],
    pub nis: f64,
    pub validation_failed: bool,
    pub reason: Option<String>,
}

pub struct Tuner {
    ekf: ExtendedKalmanFilter<4, 2>,
    environment: Arc<RwLock<Environment>>,
    bounds: ParamBounds,
    expected: ExpectedObservations,
    percent_change: PercentChange,
    config: TunerConfig,
}

impl Tuner {
    pub fn new(
        initial: ServiceParameters,
        initial_p: SMatrix<f64, 4, 4>,
        bounds: ParamBounds,
        environment: Environment,
        expected: ExpectedObservations,
        percent_change: PercentChange,
        config: TunerConfig,
    ) -> Self {
        let environment = Arc::new(RwLock::new(environment));
        let env_for_closure = environment.clone();
        let h: crate::ekf::ObsFn<4, 2> = Box::new(move |x: &SVector<f64, 4>| {
            let env = *env_for_closure.read().unwrap();
            observe(x, &env).unwrap_or_else(|| SVector::<f64, 2>::zeros())
        });
        let f: crate::ekf::StateFn<4> = Box::new(|x: &SVector<f64, 4>| *x);
        let (lo, hi) = bounds.as_arrays();
        let x_min = array4_to_vector(lo);
        let x_max = array4_to_vector(hi);
        let x0 = array4_to_vector(initial.as_array());
        let ekf = ExtendedKalmanFilter::new(x0, initial_p, f, h, Some((x_min, x_max)));
        Self { ekf, environment, bounds, expected, percent_change, config }
    }

    pub fn params(&self) -> ServiceParameters {
        ServiceParameters::from_array(vector_to_array4(self.ekf.x()))
    }

    pub fn covariance(&self) -> SMatrix<f64, 4, 4> {
        *self.ekf.p()
    }

    /// Replace the Environment for subsequent ticks. Rejected (X, P left
    /// untouched) if the new Environment is invalid.
    pub fn set_environment(&self, env: Environment) -> Result<()> {
        env.validate()?;
        *self.environment.write().unwrap() = env;
        Ok(())
    }

    fn process_noise(&self) -> SMatrix<f64, 4, 4> {
        let x = self.params();
        let pc = self.percent_change;
        SMatrix::<f64, 4, 4>::from_diagonal(&SVector::<f64, 4>::new(
            (pc.alpha * x.alpha).powi(2),
            (pc.beta * x.beta).powi(2),
            (pc.gamma * x.gamma).powi(2),
            (pc.delta * x.delta).powi(2),
        ))
    }

    fn measurement_noise(&self) -> SMatrix<f64, 2, 2> {
        let scale = (self.config.error_level / self.config.t_percentile).powi(2) / self.config.gamma_factor;
        SMatrix::<f64, 2, 2>::from_diagonal(&SVector::<f64, 2>::new(
            scale * self.expected.ttft_ms.powi(2),
            scale * self.expected.itl_ms.powi(2),
        ))
    }

    /// Run one tuner tick: predict, update with the observed (TTFT, ITL),
    /// validate, and either accept the new parameters or unstash.
    pub fn run(&mut self, observed_ttft_ms: f64, observed_itl_ms: f64) -> TunerResult {
        let stash_x = *self.ekf.x();
        let stash_p = *self.ekf.p();

        let q = self.process_noise();
        self.ekf.predict(&q);

        let r = self.measurement_noise();
        let z = SVector::<f64, 2>::new(observed_ttft_ms, observed_itl_ms);
        if let Err(e) = self.ekf.update(&z, &r) {
            self.ekf.set_state(stash_x, stash_p);
            return TunerResult {
                params: ServiceParameters::from_array(vector_to_array4(&stash_x)),
                innovation: [0.0, 0.0],
                nis: f64::INFINITY,
                validation_failed: true,
                reason: Some(e.to_string()),
            };
        }

        let params = self.params();
        let nis = self.ekf.nis().unwrap_or(f64::INFINITY);
        let mut reason = None;
        let mut failed = false;

        if !params.all_positive() {
            failed = true;
            reason = Some("tuned parameter went non-positive".to_string());
        } else if nis >= self.config.max_nis {
            failed = true;
            reason = Some(format!("NIS {nis:.3} >= max {}", self.config.max_nis));
        } else if !self.bounds.contains(&params) {
            failed = true;
            reason = Some("tuned parameter outside configured bounds".to_string());
        }

        if failed {
            self.ekf.set_state(stash_x, stash_p);
            return TunerResult {
                params: ServiceParameters::from_array(vector_to_array4(&stash_x)),
                innovation: vector_to_array2(self.ekf.last_innovation()),
                nis,
                validation_failed: true,
                reason,
            };
        }

        TunerResult {
            params,
            innovation: vector_to_array2(self.ekf.last_innovation()),
            nis,
            validation_failed: false,
            reason: None,
        }
    }
}

fn array4_to_vector(a: [f64; 4]) -> SVector<f64, 4> {
    SVector::<f64, 4>::new(a[0], a[1], a[2], a[3])
}

fn vector_to_array4(v: &SVector<f64, 4>) -> [f64; 4] {
    [v[0], v[1], v[2], v[3]]
}

fn vector_to_array2(v: &SVector<f64, 2>) -> [f64; 2] {
    [v[0], v[1]]
}

fn observe(x: &SVector<f64, 4>, env: &Environment) -> Option<SVector<f64, 2>> {
    let params = ServiceParameters::from_array(vector_to_array4(x));
    let analyzer = QueueAnalyzer::new(params, env.max_batch, env.avg_input_tokens, env.avg_output_tokens).ok()?;
    let metrics = analyzer.analyze(env.arrival_rate_per_sec).ok()?;
    Some(SVector::<f64, 2>::new(metrics.ttft_ms(), metrics.itl_ms()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_bounds() -> ParamBounds {
        ParamBounds { alpha: (1.0, 20.0), beta: (0.5, 10.0), gamma: (2.0, 50.0), delta: (0.01, 1.0) }
    }

    fn make_tuner() -> Tuner {
        let initial = ServiceParameters { alpha: 5.0, beta: 2.5, gamma: 10.0, delta: 0.15 };
        let p0 = SMatrix::<f64, 4, 4>::identity() * 1.0;
        let env = Environment { max_batch: 8, avg_input_tokens: 100.0, avg_output_tokens: 200.0, arrival_rate_per_sec: 1.0 };
        let expected = ExpectedObservations { ttft_ms: 186.7, itl_ms: 14.9 };
        Tuner::new(initial, p0, default_bounds(), env, expected, PercentChange::default(), TunerConfig::default())
    }

    #[test]
    fn converges_from_a_close_guess() {
        let mut tuner = make_tuner();
        let mut last = tuner.run(186.7, 14.9);
        for _ in 0..9 {
            if !last.validation_failed {
                let env = Environment { max_batch: 8, avg_input_tokens: 100.0, avg_output_tokens: 200.0, arrival_rate_per_sec: 1.0 };
                tuner.set_environment(env).unwrap();
            }
            last = tuner.run(186.7, 14.9);
        }
        let analyzer = QueueAnalyzer::new(tuner.params(), 8, 100.0, 200.0).unwrap();
        let predicted = analyzer.analyze(1.0).unwrap();
        let err = (predicted.ttft_ms() - 186.7).abs() + (predicted.itl_ms() - 14.9).abs();
        assert!(err < 1.0, "prediction error {err} too large, params={:?}", tuner.params());
    }

    #[test]
    fn rejects_a_far_out_observation() {
        let mut tuner = make_tuner();
        let before = tuner.params();
        let before_p = tuner.covariance();
        let result = tuner.run(10000.0, 5000.0);
        assert!(result.validation_failed);
        assert_eq!(tuner.params(), before);
        assert_eq!(tuner.covariance(), before_p);
    }

    #[test]
    fn rejected_update_is_idempotent_on_state() {
        let mut tuner = make_tuner();
        let x_before = *tuner.ekf.x();
        let p_before = *tuner.ekf.p();
        tuner.run(10000.0, 5000.0);
        assert_eq!(*tuner.ekf.x(), x_before);
        assert_eq!(*tuner.ekf.p(), p_before);
    }

    #[test]
    fn invalid_environment_does_not_touch_state() {
        let tuner = make_tuner();
        let before = tuner.params();
        let bad_env = Environment { max_batch: 0, avg_input_tokens: 100.0, avg_output_tokens: 200.0, arrival_rate_per_sec: 1.0 };
        assert!(tuner.set_environment(bad_env).is_err());
        assert_eq!(tuner.params(), before);
    }
}
