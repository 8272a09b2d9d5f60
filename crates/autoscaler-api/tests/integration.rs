use autoscaler_api::{app, StatusRegistry};
use autoscaler_core::reconciler::ModelStatus;
use axum::Router;

#[tokio::test]
async fn healthz_metrics_and_status_round_trip() {
    let registry = StatusRegistry::new();
    registry.set("model-a", ModelStatus { healthy: true, reason: None });

    let router: Router = app(registry);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let base = format!("http://{}:{}", addr.ip(), addr.port());
    let client = reqwest::Client::new();

    let r = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(r.status().is_success());

    let r = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(r.status().is_success());

    let r = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(r.status().is_success());

    let r = client.get(format!("{base}/status/model-a")).send().await.unwrap();
    assert!(r.status().is_success());
    let body: serde_json::Value = r.json().await.unwrap();
    assert_eq!(body["healthy"], true);

    let r = client.get(format!("{base}/status/unknown-model")).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::NOT_FOUND);

    drop(srv);
}
