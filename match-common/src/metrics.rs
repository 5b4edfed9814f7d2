use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const ROWS_SEEN: &str = "customer_match_rows_seen_total";
pub const ROWS_DROPPED: &str = "customer_match_rows_dropped_total";
pub const IDENTIFIERS_EMITTED: &str = "customer_match_identifiers_total";
pub const BATCHES: &str = "customer_match_batches_total";
pub const BATCH_RETRIES: &str = "customer_match_batch_retries_total";
pub const BATCH_DURATION: &str = "customer_match_batch_duration_seconds";
pub const RUNS: &str = "customer_match_runs_total";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router for a metrics endpoint, installing the global Prometheus recorder.
pub fn setup_metrics_router() -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(Router::new().route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    ))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    prometheus_builder()?.install_recorder()
}

fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    const BATCH_SECONDS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

    PrometheusBuilder::new().set_buckets(BATCH_SECONDS)
}
