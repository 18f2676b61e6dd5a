use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and describe our series.
    pub fn init(batch_size: usize) -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))
            })?
            .clone();

        describe_counter!(
            "reconcile_pairs_scored_total",
            "Activity/deal pairs scored, by confidence tier"
        );
        describe_counter!(
            "reconcile_actions_total",
            "Links and deal creations applied, by action"
        );
        describe_counter!(
            "reconcile_rollbacks_total",
            "Audited actions rolled back, by action"
        );
        record_batch_size(batch_size);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Current `batch_size`; set at startup and again on every config swap.
pub fn record_batch_size(batch_size: usize) {
    gauge!("reconcile_batch_size").set(batch_size as f64);
}
