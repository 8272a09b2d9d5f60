use autoscaler_api::{app, StatusRegistry};
use autoscaler_collector::{MetricsCollector, OrchestratorClient};
use autoscaler_common::config::{AutoscalerConfig, ModelSpec};
use autoscaler_core::model::{ParamBounds, ServiceParameters};
use autoscaler_core::reconciler::{ModelHandle, Reconciler, VariantSpec};
use autoscaler_core::tuner::{Environment, ExpectedObservations};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "autoscaler", version, about = "Fleet autoscaler for heterogeneous LLM inference deployments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconcile loop forever and serve the HTTP status/metrics surface.
    Serve,
    /// Run a single reconcile cycle across the configured fleet and exit.
    ReconcileOnce,
    /// Print the autoscaler version.
    Version,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::ReconcileOnce => reconcile_once(),
        Commands::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
}

fn build_handle(spec: &ModelSpec) -> ModelHandle {
    let variants = spec
        .variants
        .iter()
        .map(|v| VariantSpec { variant: v.variant.clone(), accelerator: v.accelerator.clone(), max_batch: v.max_batch, max_replicas: v.max_replicas })
        .collect();
    let params = ServiceParameters {
        alpha: spec.initial_params.alpha,
        beta: spec.initial_params.beta,
        gamma: spec.initial_params.gamma,
        delta: spec.initial_params.delta,
    };
    let bounds = ParamBounds { alpha: spec.bounds.alpha, beta: spec.bounds.beta, gamma: spec.bounds.gamma, delta: spec.bounds.delta };
    let environment = Environment {
        max_batch: spec.variants.first().map(|v| v.max_batch).unwrap_or(1),
        avg_input_tokens: spec.avg_input_tokens,
        avg_output_tokens: spec.avg_output_tokens,
        arrival_rate_per_sec: 1.0,
    };
    let expected = ExpectedObservations { ttft_ms: spec.expected_ttft_ms, itl_ms: spec.expected_itl_ms };
    ModelHandle::new(spec.model.clone(), spec.namespace.clone(), variants, params, bounds, environment, expected, Default::default())
}

fn build_collector(config: &AutoscalerConfig) -> Arc<dyn MetricsCollector> {
    match std::env::var("AUTOSCALER_PROMETHEUS_URL") {
        Ok(base_url) => Arc::new(autoscaler_collector_http::PrometheusMetricsCollector::new(
            autoscaler_collector_http::PrometheusConfig { base_url },
        )),
        Err(_) => {
            tracing::warn!("AUTOSCALER_PROMETHEUS_URL not set, using in-memory mock metrics collector");
            let _ = config;
            Arc::new(autoscaler_collector::mock::MockMetricsCollector::new())
        }
    }
}

fn build_orchestrator() -> Arc<dyn OrchestratorClient> {
    match std::env::var("AUTOSCALER_ORCHESTRATOR_URL") {
        Ok(base_url) => Arc::new(autoscaler_collector_http::HttpOrchestratorClient::new(base_url)),
        Err(_) => {
            tracing::warn!("AUTOSCALER_ORCHESTRATOR_URL not set, using in-memory mock orchestrator client");
            Arc::new(autoscaler_collector::mock::MockOrchestratorClient::new())
        }
    }
}

async fn serve() {
    let config = AutoscalerConfig::load();
    let registry = StatusRegistry::new();
    let collector = build_collector(&config);
    let orchestrator = build_orchestrator();

    for spec in config.fleet.clone() {
        let registry = registry.clone();
        let collector = collector.clone();
        let orchestrator = orchestrator.clone();
        let config = config.clone();
        std::thread::spawn(move || {
            let reconciler = Reconciler::new(collector, orchestrator);
            let mut handle = build_handle(&spec);
            loop {
                let status = reconciler.reconcile(&mut handle, &config, config.reconcile_interval);
                registry.set(&spec.model, status);
                std::thread::sleep(config.reconcile_interval);
            }
        });
    }

    let router = app(registry);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 8080)).await.unwrap();
    tracing::info!("listening on http://0.0.0.0:8080");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await.unwrap();
}

fn reconcile_once() {
    let config = AutoscalerConfig::load();
    let collector = build_collector(&config);
    let orchestrator = build_orchestrator();
    let reconciler = Reconciler::new(collector, orchestrator);

    if config.fleet.is_empty() {
        println!("no models configured in fleet; nothing to do");
        return;
    }

    for spec in &config.fleet {
        let mut handle = build_handle(spec);
        let status = reconciler.reconcile(&mut handle, &config, Duration::from_secs(10));
        println!("model={} healthy={} reason={:?}", spec.model, status.healthy, status.reason);
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).init();
}
