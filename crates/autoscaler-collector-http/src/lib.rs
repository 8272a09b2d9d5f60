//! Concrete collector and orchestrator client implementations: an
//! instant-query Prometheus-style metrics store read over HTTP, and an
//! HTTP orchestrator write client. One concrete implementation of a trait
//! the core crate doesn't otherwise depend on.

use autoscaler_collector::{
    is_valid_label_value, CollectedMetrics, MetricsCollector, OrchestratorClient, ReplicaSaturationSample, WorkloadObservation,
};
use autoscaler_common::{Result, RunnerError};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub base_url: String,
}

pub struct PrometheusMetricsCollector {
    client: reqwest::blocking::Client,
    config: PrometheusConfig,
}

impl PrometheusMetricsCollector {
    pub fn new(config: PrometheusConfig) -> Self {
        Self { client: reqwest::blocking::Client::new(), config }
    }

    fn query_instant(&self, promql: &str, timeout: Duration) -> Result<Vec<PromSample>> {
        let url = format!("{}/api/v1/query", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("query", promql)])
            .timeout(timeout)
            .send()
            .map_err(|e| RunnerError::TransientExternal(format!("query to metrics store failed: {e}")))?;

        if resp.status().is_server_error() {
            return Err(RunnerError::TransientExternal(format!("metrics store returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(RunnerError::Internal(format!("metrics store returned {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .map_err(|e| RunnerError::Internal(format!("malformed metrics store response: {e}")))?;

        let result = body
            .get("data")
            .and_then(|d| d.get("result"))
            .and_then(|r| r.as_array())
            .ok_or_else(|| RunnerError::Internal("missing data.result in query response".to_string()))?;

        let mut samples = Vec::with_capacity(result.len());
        for entry in result {
            let labels: HashMap<String, String> = entry
                .get("metric")
                .and_then(|m| m.as_object())
                .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
                .unwrap_or_default();
            let value = entry
                .get("value")
                .and_then(|v| v.as_array())
                .and_then(|v| v.get(1))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            samples.push(PromSample { labels, value });
        }
        Ok(samples)
    }

    fn scalar(&self, promql: &str, timeout: Duration) -> Result<f64> {
        let samples = self.query_instant(promql, timeout)?;
        Ok(samples.first().map(|s| s.value).unwrap_or(f64::NAN))
    }
}

struct PromSample {
    labels: HashMap<String, String>,
    value: f64,
}

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

impl MetricsCollector for PrometheusMetricsCollector {
    /// Issues the workload-rate queries plus two per-pod queries (KV usage,
    /// waiting queue) run in parallel; both must complete before returning.
    fn collect(&self, model: &str, namespace: &str, deadline: Duration) -> Result<CollectedMetrics> {
        if !is_valid_label_value(model) || !is_valid_label_value(namespace) {
            return Err(RunnerError::InvalidObservation("model/namespace label value invalid".to_string()));
        }
        let timeout = QUERY_TIMEOUT.min(deadline.saturating_sub(Duration::from_millis(100)));

        let (kv_result, queue_result) = std::thread::scope(|scope| {
            let kv_query = format!("max_over_time(kv_cache_usage_perc{{model=\"{model}\",namespace=\"{namespace}\"}}[1m])");
            let queue_query = format!("max_over_time(num_requests_waiting{{model=\"{model}\",namespace=\"{namespace}\"}}[1m])");
            let queue_handle = scope.spawn(|| self.query_instant(&queue_query, timeout));
            let kv = self.query_instant(&kv_query, timeout);
            let queue = queue_handle.join().unwrap_or_else(|_| Err(RunnerError::Internal("queue query thread panicked".into())));
            (kv, queue)
        });

        let kv_samples = kv_result?;
        let queue_samples = queue_result?;

        let mut by_pod: HashMap<String, ReplicaSaturationSample> = HashMap::new();
        for sample in &kv_samples {
            let pod = sample.labels.get("pod").cloned().unwrap_or_default();
            let variant = sample.labels.get("variant").cloned().unwrap_or_default();
            let accelerator = sample.labels.get("accelerator").cloned().unwrap_or_default();
            by_pod.insert(
                pod.clone(),
                ReplicaSaturationSample { pod, variant, accelerator, unit_cost: None, kv_cache_usage: sample.value, waiting_queue_len: 0 },
            );
        }
        for sample in &queue_samples {
            let pod = sample.labels.get("pod").cloned().unwrap_or_default();
            by_pod
                .entry(pod.clone())
                .and_modify(|s| s.waiting_queue_len = sample.value.max(0.0) as u32)
                .or_insert_with(|| ReplicaSaturationSample {
                    pod,
                    variant: sample.labels.get("variant").cloned().unwrap_or_default(),
                    accelerator: sample.labels.get("accelerator").cloned().unwrap_or_default(),
                    unit_cost: None,
                    kv_cache_usage: 0.0,
                    waiting_queue_len: sample.value.max(0.0) as u32,
                });
        }
        let saturation: Vec<_> = by_pod.into_values().map(ReplicaSaturationSample::normalized).collect();

        let observation = self.collect_workload_observation(model, namespace, timeout);

        Ok(CollectedMetrics { observation, saturation })
    }
}

impl PrometheusMetricsCollector {
    fn collect_workload_observation(&self, model: &str, namespace: &str, timeout: Duration) -> Option<WorkloadObservation> {
        let arrival_rate_per_min = self
            .scalar(&format!("60 * sum(rate(request_success_total{{model=\"{model}\",namespace=\"{namespace}\"}}[1m]))"), timeout)
            .ok()?;
        let avg_output_tokens = ratio_query(self, "gen_tokens_sum", "gen_tokens_count", model, namespace, timeout)?;
        let avg_input_tokens = ratio_query(self, "prompt_tokens_sum", "prompt_tokens_count", model, namespace, timeout)?;
        let observed_ttft_ms = ratio_query(self, "ttft_seconds_sum", "ttft_seconds_count", model, namespace, timeout).map(|v| v * 1000.0)?;
        let observed_itl_ms = ratio_query(self, "itl_seconds_sum", "itl_seconds_count", model, namespace, timeout).map(|v| v * 1000.0)?;
        let max_batch_size = self
            .scalar(&format!("max(max_batch_size{{model=\"{model}\",namespace=\"{namespace}\"}})"), timeout)
            .ok()
            .filter(|v| v.is_finite() && *v >= 1.0)
            .map(|v| v as usize)?;
        let current_replicas = self
            .scalar(&format!("count(kv_cache_usage_perc{{model=\"{model}\",namespace=\"{namespace}\"}})"), timeout)
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.max(0.0) as u32)
            .unwrap_or(0);

        let obs = WorkloadObservation {
            arrival_rate_per_min,
            avg_input_tokens,
            avg_output_tokens,
            observed_ttft_ms,
            observed_itl_ms,
            max_batch_size,
            current_replicas,
        };
        obs.validate().ok()?;
        Some(obs)
    }
}

fn ratio_query(
    collector: &PrometheusMetricsCollector,
    sum_metric: &str,
    count_metric: &str,
    model: &str,
    namespace: &str,
    timeout: Duration,
) -> Option<f64> {
    let query = format!(
        "sum(rate({sum_metric}{{model=\"{model}\",namespace=\"{namespace}\"}}[1m])) / sum(rate({count_metric}{{model=\"{model}\",namespace=\"{namespace}\"}}[1m]))"
    );
    collector.scalar(&query, timeout).ok().filter(|v| v.is_finite())
}

pub struct HttpOrchestratorClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[derive(serde::Serialize)]
struct SetReplicasRequest {
    replicas: u32,
}

impl HttpOrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::blocking::Client::new(), base_url: base_url.into() }
    }
}

impl OrchestratorClient for HttpOrchestratorClient {
    /// Sets a variant's desired replica count. 409 and 429 responses are
    /// retried by the caller as transient; other non-success statuses are
    /// surfaced as internal errors.
    fn set_desired_replicas(&self, namespace: &str, variant: &str, count: u32) -> Result<()> {
        if !is_valid_label_value(namespace) || !is_valid_label_value(variant) {
            return Err(RunnerError::InvalidObservation("namespace/variant label value invalid".to_string()));
        }
        let url = format!("{}/v1/namespaces/{}/variants/{}/replicas", self.base_url.trim_end_matches('/'), namespace, variant);
        let resp = self
            .client
            .put(&url)
            .json(&SetReplicasRequest { replicas: count })
            .timeout(Duration::from_secs(5))
            .send()
            .map_err(|e| RunnerError::TransientExternal(format!("orchestrator request failed: {e}")))?;

        match resp.status().as_u16() {
            200..=299 => Ok(()),
            409 | 429 => Err(RunnerError::TransientExternal(format!("orchestrator returned {}", resp.status()))),
            500..=599 => Err(RunnerError::TransientExternal(format!("orchestrator returned {}", resp.status()))),
            other => Err(RunnerError::Internal(format!("orchestrator returned unexpected status {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_namespace_label_before_sending() {
        let client = HttpOrchestratorClient::new("http://localhost:9999");
        let err = client.set_desired_replicas("-bad-", "v1", 3).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidObservation(_)));
    }
}
