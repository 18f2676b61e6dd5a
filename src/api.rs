use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::audit::AuditEntry;
use crate::config::ReconcileConfig;
use crate::reconcile::{Reconciler, ReconciliationReport, RequestContext, RunMode};
use crate::records::PipelineStage;
use crate::scoring::{score_pair, MatchScore, PairSide};
use crate::stage::StageRequest;
use crate::store::StoreError;

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

const DEFAULT_AUDIT_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/score", post(score))
        .route("/score/batch", post(score_batch))
        .route("/stage", post(stage))
        .route("/reconcile", post(reconcile))
        .route("/reconcile/link", post(link))
        .route("/reconcile/rollback/{id}", post(rollback))
        .route("/debug/audit", get(debug_audit))
        .route("/admin/reload-config", post(admin_reload_config))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Map an error to a status: known store failures keep their meaning,
/// everything else is a 500.
fn error_response(err: anyhow::Error) -> Response {
    let status = match err.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(target: "reconcile", error = ?err, "request failed");
    }
    (status, Json(json!({ "error": format!("{err:#}") }))).into_response()
}

fn request_context(headers: &HeaderMap, reconciler: &Reconciler) -> RequestContext {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RequestContext::new)
        .unwrap_or_else(|| reconciler.default_context())
}

#[derive(Debug, Deserialize)]
struct ScoreReq {
    activity: PairSide,
    deal: PairSide,
}

async fn score(Json(body): Json<ScoreReq>) -> Json<MatchScore> {
    Json(score_pair(&body.activity, &body.deal))
}

async fn score_batch(Json(items): Json<Vec<ScoreReq>>) -> Json<Vec<MatchScore>> {
    Json(
        items
            .iter()
            .map(|it| score_pair(&it.activity, &it.deal))
            .collect(),
    )
}

#[derive(Serialize)]
struct StageResp {
    stage: PipelineStage,
}

async fn stage(Json(body): Json<StageRequest>) -> Json<StageResp> {
    Json(StageResp {
        stage: body.assign(),
    })
}

#[derive(Debug, Deserialize)]
struct ReconcileQuery {
    #[serde(default)]
    dry_run: Option<bool>,
}

/// Dry-run unless the caller explicitly asks for `dry_run=false`.
async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ReconcileQuery>,
) -> Result<Json<ReconciliationReport>, Response> {
    let ctx = request_context(&headers, &state.reconciler);
    let mode = if q.dry_run == Some(false) {
        RunMode::Apply
    } else {
        RunMode::DryRun
    };
    state
        .reconciler
        .run(&ctx, mode)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct LinkReq {
    activity_id: String,
    deal_id: String,
}

async fn link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LinkReq>,
) -> Result<Json<AuditEntry>, Response> {
    let ctx = request_context(&headers, &state.reconciler);
    state
        .reconciler
        .link(&ctx, &body.activity_id, &body.deal_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn rollback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<AuditEntry>, Response> {
    let ctx = request_context(&headers, &state.reconciler);
    state
        .reconciler
        .rollback(&ctx, id)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn debug_audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let n = q.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    Json(state.reconciler.audit().snapshot_last_n(n))
}

async fn admin_reload_config(State(state): State<AppState>) -> Response {
    match ReconcileConfig::load() {
        Ok(cfg) => {
            info!(target: "reconcile", ?cfg, "config reloaded");
            state.reconciler.replace_config(cfg);
            "reloaded".into_response()
        }
        Err(e) => error_response(e.context("reloading config")),
    }
}
