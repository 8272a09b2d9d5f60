//! Composes a prefill queue and a decode queue for one inference engine.
//! Units: the four service-rate parameters (α, β, γ, δ) and every
//! predicted time here are in milliseconds, matching the observed
//! TTFT/ITL the tuner compares against; the arrival rate handed to
//! [`QueueAnalyzer::analyze`] is requests/second and is converted to
//! requests/millisecond internally before solving the decode queue.

use crate::model::ServiceParameters;
use crate::queue::QueueModel;
use autoscaler_common::{Result, RunnerError};

const DEFAULT_QUEUE_RATIO: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerMetrics {
    pub avg_wait_time_ms: f64,
    pub avg_prefill_time_ms: f64,
    pub avg_token_time_ms: f64,
    pub avg_serv_time_ms: f64,
}

impl AnalyzerMetrics {
    pub fn ttft_ms(&self) -> f64 {
        self.avg_wait_time_ms + self.avg_prefill_time_ms
    }

    pub fn itl_ms(&self) -> f64 {
        self.avg_token_time_ms
    }
}

pub struct QueueAnalyzer {
    params: ServiceParameters,
    max_batch: usize,
    max_queue_size: usize,
    avg_input_tokens: f64,
    avg_output_tokens: f64,
}

impl QueueAnalyzer {
    pub fn new(
        params: ServiceParameters,
        max_batch: usize,
        avg_input_tokens: f64,
        avg_output_tokens: f64,
    ) -> Result<Self> {
        Self::with_queue_ratio(params, max_batch, DEFAULT_QUEUE_RATIO, avg_input_tokens, avg_output_tokens)
    }

    pub fn with_queue_ratio(
        params: ServiceParameters,
        max_batch: usize,
        queue_ratio: f64,
        avg_input_tokens: f64,
        avg_output_tokens: f64,
    ) -> Result<Self> {
        if params.alpha <= 0.0 || params.beta <= 0.0 || params.gamma <= 0.0 || params.delta <= 0.0 {
            return Err(RunnerError::InvalidObservation("service parameters must be > 0".into()));
        }
        if max_batch < 1 {
            return Err(RunnerError::InvalidObservation("max batch must be >= 1".into()));
        }
        let max_queue_size = (max_batch as f64 * queue_ratio).floor() as i64;
        if max_queue_size <= 0 {
            return Err(RunnerError::InvalidObservation("max queue size must be > 0".into()));
        }
        if avg_input_tokens <= 0.0 || avg_output_tokens <= 0.0 {
            return Err(RunnerError::InvalidObservation("request sizes must be > 0".into()));
        }
        Ok(Self { params, max_batch, max_queue_size: max_queue_size as usize, avg_input_tokens, avg_output_tokens })
    }

    fn decode_mu(&self) -> Vec<f64> {
        (1..=self.max_batch)
            .map(|n| {
                let n = n as f64;
                n / ((self.params.alpha + self.params.beta * n) * self.avg_output_tokens)
            })
            .collect()
    }

    pub fn analyze(&self, lambda_per_sec: f64) -> Result<AnalyzerMetrics> {
        let lambda_per_ms = lambda_per_sec / 1000.0;
        let mut decode = QueueModel::new(self.decode_mu(), self.max_queue_size.max(self.max_batch));
        decode.solve(lambda_per_ms);
        if !decode.is_valid() {
            return Err(RunnerError::InvalidObservation("decode queue solve failed (overloaded or invalid rates)".into()));
        }
        let avg_wait_time_ms = decode.avg_waiting_time();
        let avg_serv_time_ms = decode.avg_service_time();
        let avg_token_time_ms = avg_serv_time_ms / self.avg_output_tokens;
        let avg_prefill_time_ms = self.params.gamma + self.params.delta * self.avg_input_tokens;
        Ok(AnalyzerMetrics { avg_wait_time_ms, avg_prefill_time_ms, avg_token_time_ms, avg_serv_time_ms })
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }
}
