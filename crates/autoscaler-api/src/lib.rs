//! HTTP surface: health, readiness, Prometheus metrics, and per-model
//! status conditions. Each model gets its own independent status
//! condition.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use autoscaler_core::reconciler::ModelStatus;
use once_cell::sync::Lazy;
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Shared snapshot of every model's latest status condition, written by the
/// reconcile loop and read by the HTTP surface.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RwLock<HashMap<String, ModelStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, model: &str, status: ModelStatus) {
        autoscaler_obs::record_model_health(model, status.healthy);
        self.inner.write().unwrap().insert(model.to_string(), status);
    }

    pub fn get(&self, model: &str) -> Option<ModelStatus> {
        self.inner.read().unwrap().get(model).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, ModelStatus> {
        self.inner.read().unwrap().clone()
    }

    fn all_healthy(&self) -> bool {
        self.inner.read().unwrap().values().all(|s| s.healthy)
    }
}

pub fn app(registry: StatusRegistry) -> Router {
    autoscaler_obs::init();
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status_all))
        .route("/status/:model", get(status_one))
        .with_state(registry)
}

async fn metrics() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    ENCODER.encode(&metric_families, &mut buffer).unwrap();
    ([("content-type", ENCODER.format_type().to_string())], buffer)
}

async fn readyz(State(registry): State<StatusRegistry>) -> impl IntoResponse {
    if registry.all_healthy() {
        ([("content-type", "text/plain")], "ready")
    } else {
        ([("content-type", "text/plain")], "degraded")
    }
}

async fn status_all(State(registry): State<StatusRegistry>) -> Json<HashMap<String, ModelStatus>> {
    Json(registry.snapshot())
}

async fn status_one(State(registry): State<StatusRegistry>, Path(model): Path<String>) -> impl IntoResponse {
    match registry.get(&model) {
        Some(status) => (axum::http::StatusCode::OK, Json(status)).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown model" }))).into_response(),
    }
}
