// tests/reconcile_flow.rs
//
// End-to-end reconciler behaviour against the in-memory store:
// dry-run vs apply, stage relabelling, deal creation, manual links, rollback.

use std::sync::Arc;

use deal_reconciler::audit::AuditAction;
use deal_reconciler::reconcile::{MatchAction, Reconciler, RequestContext, RunMode};
use deal_reconciler::store::{InMemoryStore, RecordStore, StoreError};
use deal_reconciler::ReconcileConfig;

const SEED: &str = r#"{
  "activities": [
    {"id":"a1","client_name":"Viewpoint Construction","amount":10000.0,"date":"2024-01-15T10:00:00Z","type":"sale","status":"completed"},
    {"id":"a2","client_name":"ViewPoint VC","amount":5000.0,"date":"2024-02-01T10:00:00Z","type":"sale","status":"completed"},
    {"id":"a3","client_name":"Northwind Traders","amount":750.0,"date":"2024-03-01","type":"sale","status":"completed"},
    {"id":"a4","client_name":"Viewpoint Construction","amount":null,"date":"2024-01-15","type":"meeting","status":"completed"}
  ],
  "deals": [
    {"id":"d1","name":"Viewpoint Construction","value":10000.0,"stage":"Proposal","status":"active","stage_changed_at":"2024-01-15T08:00:00Z","owner_id":"rep-1"},
    {"id":"d2","name":"Viewpoint Construction","value":5200.0,"stage":"Proposal","status":"active","stage_changed_at":"2024-02-02T10:00:00Z","owner_id":"rep-1"},
    {"id":"d3","name":"Quokka Jazz Ltd","value":99.0,"stage":"Verbal","status":"active","stage_changed_at":"2023-06-01","owner_id":"rep-2"}
  ]
}"#;

fn setup(cfg: ReconcileConfig) -> (Arc<InMemoryStore>, Reconciler) {
    let store = Arc::new(InMemoryStore::from_json_str(SEED).expect("seed"));
    let reconciler = Reconciler::new(store.clone(), cfg);
    (store, reconciler)
}

fn ctx() -> RequestContext {
    RequestContext::new("rep-9")
}

#[tokio::test]
async fn dry_run_plans_but_never_writes() {
    let (store, rec) = setup(ReconcileConfig::default());
    let before_a = store.activities();
    let before_d = store.deals();

    let report = rec.run(&ctx(), RunMode::DryRun).await.unwrap();
    assert_eq!(report.mode, RunMode::DryRun);
    // 3 orphan sales × 3 orphan deals
    assert_eq!(report.pairs_scored, 9);
    assert!(!report.matches.is_empty());
    assert!(report.linked.is_empty());
    assert!(report.created_deals.is_empty());

    assert_eq!(store.activities(), before_a);
    assert_eq!(store.deals(), before_d);
    assert!(rec.audit().is_empty());
}

#[tokio::test]
async fn apply_links_high_confidence_and_queues_medium() {
    let (store, rec) = setup(ReconcileConfig::default());
    let report = rec.run(&ctx(), RunMode::Apply).await.unwrap();

    // a1↔d1 is a perfect match
    let m1 = report
        .matches
        .iter()
        .find(|m| m.activity_id == "a1")
        .expect("a1 proposed");
    assert_eq!(m1.deal_id, "d1");
    assert_eq!(m1.action, MatchAction::AutoLink);
    assert_eq!(m1.score.total_score, 100);

    // a2↔d2: abbreviated name, 4% apart, 1 day apart → review
    let m2 = report
        .matches
        .iter()
        .find(|m| m.activity_id == "a2")
        .expect("a2 proposed");
    assert_eq!(m2.deal_id, "d2");
    assert_eq!(m2.action, MatchAction::Review);
    assert_eq!(report.review_queue, vec![m2.clone()]);

    assert_eq!(report.linked.len(), 1);
    assert_eq!(report.linked[0].action, AuditAction::AutoLink);
    assert_eq!(report.linked[0].actor, "rep-9");
    assert_eq!(report.unmatched_activities, vec!["a3".to_string()]);
    assert_eq!(report.unmatched_deals, vec!["d3".to_string()]);

    let a1 = store.activity("a1").await.unwrap().unwrap();
    assert_eq!(a1.deal_id.as_deref(), Some("d1"));
    let a2 = store.activity("a2").await.unwrap().unwrap();
    assert!(a2.deal_id.is_none(), "review matches are not linked");

    // completed sale relabels the deal
    let d1 = store.deal("d1").await.unwrap().unwrap();
    assert_eq!(d1.stage, "Closed Won");
    assert_eq!(report.linked[0].previous_stage.as_deref(), Some("Proposal"));
}

#[tokio::test]
async fn second_apply_is_a_no_op_for_linked_records() {
    let (_store, rec) = setup(ReconcileConfig::default());
    rec.run(&ctx(), RunMode::Apply).await.unwrap();
    let again = rec.run(&ctx(), RunMode::Apply).await.unwrap();
    assert!(again.linked.is_empty());
    assert!(again.matches.iter().all(|m| m.activity_id != "a1"));
}

#[tokio::test]
async fn orphan_sales_get_closed_won_deals_when_enabled() {
    let cfg = ReconcileConfig {
        create_deals_for_orphans: true,
        ..Default::default()
    };
    let (store, rec) = setup(cfg);
    let report = rec.run(&ctx(), RunMode::Apply).await.unwrap();

    assert_eq!(report.created_deals.len(), 1);
    let entry = &report.created_deals[0];
    assert_eq!(entry.action, AuditAction::CreateDeal);
    assert_eq!(entry.activity_id, "a3");

    let deal = store.deal(&entry.deal_id).await.unwrap().unwrap();
    assert_eq!(deal.stage, "Closed Won");
    assert_eq!(deal.name, "Northwind Traders");
    assert_eq!(deal.owner_id, "rep-9");
    assert!((deal.value - 750.0).abs() < 1e-9);

    let a3 = store.activity("a3").await.unwrap().unwrap();
    assert_eq!(a3.deal_id.as_deref(), Some(entry.deal_id.as_str()));
}

#[tokio::test]
async fn rollback_restores_every_touched_record() {
    let cfg = ReconcileConfig {
        create_deals_for_orphans: true,
        ..Default::default()
    };
    let (store, rec) = setup(cfg);
    let before_a = store.activities();
    let before_d = store.deals();

    let report = rec.run(&ctx(), RunMode::Apply).await.unwrap();
    for e in report.linked.iter().chain(report.created_deals.iter()) {
        let undone = rec.rollback(&ctx(), e.id).await.unwrap();
        assert!(undone.rolled_back);
    }

    assert_eq!(store.activities(), before_a);
    assert_eq!(store.deals(), before_d);
}

#[tokio::test]
async fn rollback_twice_is_a_conflict() {
    let (_store, rec) = setup(ReconcileConfig::default());
    let report = rec.run(&ctx(), RunMode::Apply).await.unwrap();
    let id = report.linked[0].id;

    rec.rollback(&ctx(), id).await.unwrap();
    let err = rec.rollback(&ctx(), id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Conflict(_))
    ));

    let err = rec.rollback(&ctx(), 4242).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn manual_link_scores_and_relabels() {
    let (store, rec) = setup(ReconcileConfig::default());

    let entry = rec.link(&ctx(), "a2", "d2").await.unwrap();
    assert_eq!(entry.action, AuditAction::ManualLink);
    let score = entry.score.expect("manual links carry a score");
    assert_eq!(score.total_score, score.name_score + score.date_score + score.amount_score);

    let d2 = store.deal("d2").await.unwrap().unwrap();
    assert_eq!(d2.stage, "Closed Won");

    // already linked
    let err = rec.link(&ctx(), "a2", "d1").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Conflict(_))
    ));

    // unknown ids
    let err = rec.link(&ctx(), "nope", "d1").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn meeting_link_leaves_stage_as_proposal() {
    let (store, rec) = setup(ReconcileConfig::default());
    let entry = rec.link(&ctx(), "a4", "d1").await.unwrap();
    // d1 is already "Proposal", so nothing to relabel or restore
    assert!(entry.previous_stage.is_none());
    let d1 = store.deal("d1").await.unwrap().unwrap();
    assert_eq!(d1.stage, "Proposal");
}

#[tokio::test]
async fn config_swap_takes_effect_on_next_run() {
    let (_store, rec) = setup(ReconcileConfig::default());
    rec.replace_config(ReconcileConfig {
        batch_size: 1,
        ..Default::default()
    });
    let report = rec.run(&ctx(), RunMode::DryRun).await.unwrap();
    assert_eq!(report.deferred_activities, 2);
    assert_eq!(report.pairs_scored, 3);
}
