//! In-memory `MetricsCollector` / `OrchestratorClient` for tests and local
//! runs without a live Prometheus or orchestrator endpoint.

use crate::{CollectedMetrics, MetricsCollector, OrchestratorClient};
use autoscaler_common::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MockMetricsCollector {
    fixtures: Mutex<HashMap<(String, String), CollectedMetrics>>,
}

impl MockMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, model: &str, namespace: &str, metrics: CollectedMetrics) {
        self.fixtures.lock().unwrap().insert((model.to_string(), namespace.to_string()), metrics);
    }
}

impl MetricsCollector for MockMetricsCollector {
    fn collect(&self, model: &str, namespace: &str, _deadline: Duration) -> Result<CollectedMetrics> {
        Ok(self
            .fixtures
            .lock()
            .unwrap()
            .get(&(model.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or(CollectedMetrics { observation: None, saturation: Vec::new() }))
    }
}

#[derive(Default)]
pub struct MockOrchestratorClient {
    emitted: Mutex<Vec<(String, String, u32)>>,
}

impl MockOrchestratorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<(String, String, u32)> {
        self.emitted.lock().unwrap().clone()
    }
}

impl OrchestratorClient for MockOrchestratorClient {
    fn set_desired_replicas(&self, namespace: &str, variant: &str, count: u32) -> Result<()> {
        self.emitted.lock().unwrap().push((namespace.to_string(), variant.to_string(), count));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_orchestrator_records_emissions() {
        let client = MockOrchestratorClient::new();
        client.set_desired_replicas("ns", "a100", 3).unwrap();
        assert_eq!(client.emitted(), vec![("ns".to_string(), "a100".to_string(), 3)]);
    }

    #[test]
    fn mock_collector_returns_empty_when_unset() {
        let collector = MockMetricsCollector::new();
        let metrics = collector.collect("m", "ns", Duration::from_secs(5)).unwrap();
        assert!(metrics.observation.is_none());
        assert!(metrics.saturation.is_empty());
    }
}
