//! Deal reconciliation service: binary entrypoint.
//! Boots the Axum HTTP server with the reconciler, config and Prometheus metrics.

use deal_reconciler::{app, metrics::Metrics, telemetry, ReconcileConfig};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    telemetry::init_dev_tracing();

    let cfg = ReconcileConfig::load().map_err(shuttle_runtime::Error::Custom)?;
    let metrics = Metrics::init(cfg.batch_size).map_err(shuttle_runtime::Error::Custom)?;

    let router = app(cfg)
        .await
        .map_err(shuttle_runtime::Error::Custom)?
        .merge(metrics.router());

    Ok(router.into())
}
