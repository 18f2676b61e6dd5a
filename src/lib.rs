// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod audit;
pub mod config;
pub mod metrics;
pub mod reconcile;
pub mod records;
pub mod scoring;
pub mod stage;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use tracing::info;

pub use crate::api::{create_router, AppState};
pub use crate::config::ReconcileConfig;
pub use crate::reconcile::{Reconciler, RequestContext, RunMode};
pub use crate::scoring::{score_pair, ConfidenceLevel, MatchScore, PairSide};
pub use crate::store::{InMemoryStore, RecordStore};

/// Build the full in-process app from an already loaded config plus the
/// store seed (`RECONCILE_SEED_PATH`). No metrics route; the binary merges that in.
pub async fn app(cfg: ReconcileConfig) -> anyhow::Result<axum::Router> {
    let store = InMemoryStore::from_env()?;
    info!(
        target: "reconcile",
        batch_size = cfg.batch_size,
        auto_link_min = %cfg.auto_link_min,
        review_min = %cfg.review_min,
        "reconciler configured"
    );
    let reconciler = Reconciler::new(Arc::new(store), cfg);
    Ok(create_router(AppState::new(reconciler)))
}
