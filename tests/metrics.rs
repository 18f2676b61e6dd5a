// tests/metrics.rs
//
// The Prometheus exposition carries every reconcile series once the
// corresponding code paths have run. One test: the recorder is process-global.

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as Json};
use tower::ServiceExt;

use deal_reconciler::api::{create_router, AppState};
use deal_reconciler::metrics::Metrics;
use deal_reconciler::{InMemoryStore, ReconcileConfig, Reconciler};

const SEED: &str = r#"{
  "activities": [
    {"id":"a1","client_name":"Viewpoint Construction","amount":10000.0,"date":"2024-01-15","type":"sale","status":"completed"}
  ],
  "deals": [
    {"id":"d1","name":"Viewpoint Construction","value":10000.0,"stage":"Proposal","status":"active","stage_changed_at":"2024-01-15","owner_id":"rep-1"}
  ]
}"#;

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn post(uri: &str, payload: Option<Json>) -> Request<Body> {
    let builder = Request::post(uri).header("content-type", "application/json");
    match payload {
        Some(p) => builder.body(Body::from(p.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn gauge_value(text: &str, name: &str) -> Option<f64> {
    text.lines()
        .find(|l| l.starts_with(name) && l[name.len()..].starts_with(' '))
        .and_then(|l| l.split_whitespace().last())
        .and_then(|v| v.parse().ok())
}

#[tokio::test]
async fn metrics_endpoint_exposes_reconcile_series() {
    let cfg = ReconcileConfig::default();
    let metrics = Metrics::init(cfg.batch_size).expect("recorder installs");

    let reconciler = Reconciler::new(
        std::sync::Arc::new(InMemoryStore::from_json_str(SEED).unwrap()),
        cfg,
    );
    let state = AppState::new(reconciler);
    let reconciler = state.reconciler.clone();
    let app = create_router(state).merge(metrics.router());

    let pair = json!({
        "activity": {"name": "Acme", "amount": 100, "date": "2024-01-15"},
        "deal":     {"name": "Acme", "amount": 100, "date": "2024-01-15"}
    });
    let (status, _) = call(&app, post("/score", Some(pair))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, post("/reconcile?dry_run=false", None)).await;
    assert_eq!(status, StatusCode::OK);
    let report: Json = serde_json::from_str(&body).unwrap();
    let audit_id = report["linked"][0]["id"].as_u64().expect("one auto link");

    let (status, _) = call(&app, post(&format!("/reconcile/rollback/{audit_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);

    reconciler.replace_config(ReconcileConfig {
        batch_size: 7,
        ..Default::default()
    });

    let (status, text) = call(
        &app,
        Request::get("/metrics").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for needle in [
        r#"reconcile_pairs_scored_total{tier="high_confidence"}"#,
        r#"reconcile_actions_total{action="auto_link"}"#,
        r#"reconcile_rollbacks_total{action="auto_link"}"#,
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
    assert_eq!(gauge_value(&text, "reconcile_batch_size"), Some(7.0), "{text}");
}
