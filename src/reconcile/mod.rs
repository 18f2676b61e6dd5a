// src/reconcile/mod.rs
//! Reconciler: runs plans against a record store, applies links, creates
//! deals for orphan sales, and undoes any of that from the audit log.

pub mod plan;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditAction, AuditDraft, AuditEntry, AuditLog};
use crate::config::ReconcileConfig;
use crate::records::{Activity, ActivityStatus, Deal, DealStatus, NewDeal};
use crate::scoring::{score_records, MatchScore};
use crate::stage::{stage_for_activity, RECONCILED_DEAL_STAGE};
use crate::store::{DynRecordStore, StoreError};
use crate::telemetry::anon_hash;

pub use crate::reconcile::plan::{
    plan, MatchAction, ProposedMatch, ReconciliationPlan, TierCounts,
};

/// Who is acting. Passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub mode: RunMode,
    pub pairs_scored: usize,
    pub tier_counts: TierCounts,
    pub deferred_activities: usize,
    /// Every proposal, auto-link and review alike.
    pub matches: Vec<ProposedMatch>,
    pub review_queue: Vec<ProposedMatch>,
    /// Applied links (empty on dry-run).
    pub linked: Vec<AuditEntry>,
    /// Deals created for orphan sales (empty on dry-run).
    pub created_deals: Vec<AuditEntry>,
    pub unmatched_activities: Vec<String>,
    pub unmatched_deals: Vec<String>,
    /// Actions that could not be applied. The run carries on past them.
    #[serde(default)]
    pub failed: Vec<FailedAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub activity_id: String,
    /// None when the failure was creating a deal.
    pub deal_id: Option<String>,
    pub error: String,
}

impl ReconciliationReport {
    fn from_plan(mode: RunMode, p: ReconciliationPlan) -> Self {
        let review_queue = p
            .matches
            .iter()
            .filter(|m| m.action == MatchAction::Review)
            .cloned()
            .collect();
        Self {
            mode,
            pairs_scored: p.pairs_scored,
            tier_counts: p.tier_counts,
            deferred_activities: p.deferred_activities,
            matches: p.matches,
            review_queue,
            linked: Vec::new(),
            created_deals: Vec::new(),
            unmatched_activities: p.unmatched_activities,
            unmatched_deals: p.unmatched_deals,
            failed: Vec::new(),
        }
    }
}

pub struct Reconciler {
    store: DynRecordStore,
    config: RwLock<ReconcileConfig>,
    audit: AuditLog,
    /// Held by every store-mutating operation, across its awaits.
    writes: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: DynRecordStore, config: ReconcileConfig) -> Self {
        let audit = AuditLog::with_capacity(config.audit_capacity);
        Self {
            store,
            config: RwLock::new(config),
            audit,
            writes: Mutex::new(()),
        }
    }

    /// Current policy (cloned; never hold the lock across I/O).
    pub fn config(&self) -> ReconcileConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap policy at runtime. Audit capacity keeps its startup value.
    pub fn replace_config(&self, cfg: ReconcileConfig) {
        crate::metrics::record_batch_size(cfg.batch_size);
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cfg;
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store(&self) -> &DynRecordStore {
        &self.store
    }

    /// Context for requests that carry no user.
    pub fn default_context(&self) -> RequestContext {
        RequestContext::new(self.config().default_owner)
    }

    /// One reconciliation pass over the current orphans.
    pub async fn run(&self, ctx: &RequestContext, mode: RunMode) -> Result<ReconciliationReport> {
        let _writes = match mode {
            RunMode::Apply => Some(self.writes.lock().await),
            RunMode::DryRun => None,
        };
        let cfg = self.config();
        let activities = self
            .store
            .orphan_activities()
            .await
            .context("loading orphan activities")?;
        let deals = self
            .store
            .orphan_deals()
            .await
            .context("loading orphan deals")?;

        let p = plan(&activities, &deals, &cfg);
        info!(
            target: "reconcile",
            user = %ctx.user_id,
            ?mode,
            activities = activities.len(),
            deals = deals.len(),
            pairs = p.pairs_scored,
            proposed = p.matches.len(),
            "reconciliation planned"
        );

        let mut report = ReconciliationReport::from_plan(mode, p);
        if mode == RunMode::DryRun {
            return Ok(report);
        }

        let by_activity: HashMap<&str, &Activity> =
            activities.iter().map(|a| (a.id.as_str(), a)).collect();
        let by_deal: HashMap<&str, &Deal> = deals.iter().map(|d| (d.id.as_str(), d)).collect();

        for m in report
            .matches
            .iter()
            .filter(|m| m.action == MatchAction::AutoLink)
        {
            let (Some(activity), Some(deal)) = (
                by_activity.get(m.activity_id.as_str()),
                by_deal.get(m.deal_id.as_str()),
            ) else {
                continue;
            };
            match self
                .apply_link(ctx, activity, deal, AuditAction::AutoLink, m.score)
                .await
            {
                Ok(entry) => report.linked.push(entry),
                Err(e) => {
                    warn!(
                        target: "reconcile",
                        activity = %m.activity_id,
                        deal = %m.deal_id,
                        error = %format!("{e:#}"),
                        "auto-link skipped"
                    );
                    report.failed.push(FailedAction {
                        activity_id: m.activity_id.clone(),
                        deal_id: Some(m.deal_id.clone()),
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        if cfg.create_deals_for_orphans {
            for id in &report.unmatched_activities {
                let Some(activity) = by_activity.get(id.as_str()) else {
                    continue;
                };
                if activity.status != ActivityStatus::Completed {
                    debug!(
                        target: "reconcile",
                        activity = %activity.id,
                        status = ?activity.status,
                        "sale not completed; no deal created"
                    );
                    continue;
                }
                match self.create_deal_for(ctx, activity).await {
                    Ok(entry) => report.created_deals.push(entry),
                    Err(e) => {
                        warn!(
                            target: "reconcile",
                            activity = %activity.id,
                            error = %format!("{e:#}"),
                            "deal creation skipped"
                        );
                        report.failed.push(FailedAction {
                            activity_id: activity.id.clone(),
                            deal_id: None,
                            error: format!("{e:#}"),
                        });
                    }
                }
            }
        }

        info!(
            target: "reconcile",
            linked = report.linked.len(),
            created = report.created_deals.len(),
            review = report.review_queue.len(),
            failed = report.failed.len(),
            "reconciliation applied"
        );
        Ok(report)
    }

    /// Manually link an activity to a deal, regardless of score.
    pub async fn link(
        &self,
        ctx: &RequestContext,
        activity_id: &str,
        deal_id: &str,
    ) -> Result<AuditEntry> {
        let _writes = self.writes.lock().await;
        let activity = self
            .store
            .activity(activity_id)
            .await?
            .ok_or_else(|| StoreError::activity_not_found(activity_id))?;
        let deal = self
            .store
            .deal(deal_id)
            .await?
            .ok_or_else(|| StoreError::deal_not_found(deal_id))?;
        if let Some(existing) = &activity.deal_id {
            return Err(StoreError::Conflict(format!(
                "activity `{activity_id}` is already linked to deal `{existing}`"
            ))
            .into());
        }

        let score = score_records(&activity, &deal);
        self.apply_link(ctx, &activity, &deal, AuditAction::ManualLink, score)
            .await
    }

    /// Undo one audited action. Preconditions are checked before the first
    /// write; if a later write fails the activity is linked back.
    pub async fn rollback(&self, ctx: &RequestContext, audit_id: u64) -> Result<AuditEntry> {
        let _writes = self.writes.lock().await;
        let entry = self.audit.get(audit_id).ok_or(StoreError::NotFound {
            kind: "audit entry",
            id: audit_id.to_string(),
        })?;
        if entry.rolled_back {
            return Err(
                StoreError::Conflict(format!("audit entry {audit_id} already rolled back")).into(),
            );
        }

        let activity = self
            .store
            .activity(&entry.activity_id)
            .await?
            .ok_or_else(|| StoreError::activity_not_found(&entry.activity_id))?;
        if activity.deal_id.as_deref() != Some(entry.deal_id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "activity `{}` is no longer linked to deal `{}`",
                entry.activity_id, entry.deal_id
            ))
            .into());
        }
        match entry.action {
            AuditAction::CreateDeal => {
                let others: Vec<String> = self
                    .store
                    .activities_for_deal(&entry.deal_id)
                    .await?
                    .into_iter()
                    .filter(|a| a.id != entry.activity_id)
                    .map(|a| a.id)
                    .collect();
                if !others.is_empty() {
                    return Err(StoreError::Conflict(format!(
                        "deal `{}` is also linked to {}; roll those back first",
                        entry.deal_id,
                        others.join(", ")
                    ))
                    .into());
                }
            }
            AuditAction::AutoLink | AuditAction::ManualLink => {
                if entry.previous_stage.is_some() {
                    self.store
                        .deal(&entry.deal_id)
                        .await?
                        .ok_or_else(|| StoreError::deal_not_found(&entry.deal_id))?;
                }
            }
        }

        self.store.unlink_activity(&entry.activity_id).await?;
        let undone = match entry.action {
            AuditAction::AutoLink | AuditAction::ManualLink => {
                match (&entry.previous_stage, &entry.previous_stage_changed_at) {
                    (Some(stage), Some(changed_at)) => {
                        self.store
                            .set_deal_stage(&entry.deal_id, stage, changed_at)
                            .await
                    }
                    _ => Ok(()),
                }
            }
            AuditAction::CreateDeal => self.store.delete_deal(&entry.deal_id).await,
        };
        if let Err(e) = undone {
            self.relink(&entry.activity_id, &entry.deal_id).await;
            return Err(e.context(format!("rolling back audit entry {audit_id}")));
        }

        let undone = self.audit.mark_rolled_back(audit_id)?;
        counter!("reconcile_rollbacks_total", "action" => undone.action.as_str()).increment(1);
        info!(
            target: "reconcile",
            user = %ctx.user_id,
            audit_id,
            action = undone.action.as_str(),
            "rolled back"
        );
        Ok(undone)
    }

    /// Link, relabel, record. A failed relabel unlinks again so no link
    /// exists without an audit entry.
    async fn apply_link(
        &self,
        ctx: &RequestContext,
        activity: &Activity,
        deal: &Deal,
        action: AuditAction,
        score: MatchScore,
    ) -> Result<AuditEntry> {
        self.store
            .link_activity(&activity.id, &deal.id)
            .await
            .with_context(|| format!("linking activity {} to deal {}", activity.id, deal.id))?;

        let stage = stage_for_activity(activity.activity_type, activity.status);
        let (previous_stage, previous_stage_changed_at) = if deal.stage != stage.as_str() {
            if let Err(e) = self
                .store
                .set_deal_stage(&deal.id, stage.as_str(), &now_rfc3339())
                .await
            {
                self.unlink_quietly(&activity.id).await;
                return Err(e.context(format!("relabelling deal {}", deal.id)));
            }
            (Some(deal.stage.clone()), Some(deal.stage_changed_at.clone()))
        } else {
            (None, None)
        };

        let entry = self.audit.record(AuditDraft {
            action,
            actor: ctx.user_id.clone(),
            activity_id: activity.id.clone(),
            deal_id: deal.id.clone(),
            score: Some(score),
            previous_stage,
            previous_stage_changed_at,
        });

        counter!("reconcile_actions_total", "action" => action.as_str()).increment(1);
        debug!(
            target: "reconcile",
            audit_id = entry.id,
            client = %anon_hash(&activity.client_name),
            total = score.total_score,
            tier = score.confidence_level.as_str(),
            stage = stage.as_str(),
            "linked"
        );
        Ok(entry)
    }

    /// Zero or missing amounts still get a deal, valued at 0.
    async fn create_deal_for(&self, ctx: &RequestContext, activity: &Activity) -> Result<AuditEntry> {
        let value = activity.amount.filter(|v| v.is_finite() && *v > 0.0);
        if value.is_none() {
            warn!(
                target: "reconcile",
                activity = %activity.id,
                "orphan sale without a usable amount; creating zero-value deal"
            );
        }
        let deal = self
            .store
            .insert_deal(NewDeal {
                name: activity.client_name.trim().to_string(),
                value: value.unwrap_or(0.0),
                stage: RECONCILED_DEAL_STAGE,
                status: DealStatus::Won,
                owner_id: ctx.user_id.clone(),
            })
            .await
            .with_context(|| format!("creating deal for activity {}", activity.id))?;
        if let Err(e) = self.store.link_activity(&activity.id, &deal.id).await {
            if let Err(del) = self.store.delete_deal(&deal.id).await {
                error!(
                    target: "reconcile",
                    deal = %deal.id,
                    error = %format!("{del:#}"),
                    "could not remove deal after failed link"
                );
            }
            return Err(e.context(format!("linking activity {} to new deal", activity.id)));
        }

        let entry = self.audit.record(AuditDraft {
            action: AuditAction::CreateDeal,
            actor: ctx.user_id.clone(),
            activity_id: activity.id.clone(),
            deal_id: deal.id.clone(),
            score: None,
            previous_stage: None,
            previous_stage_changed_at: None,
        });
        counter!("reconcile_actions_total", "action" => AuditAction::CreateDeal.as_str())
            .increment(1);
        Ok(entry)
    }

    async fn unlink_quietly(&self, activity_id: &str) {
        if let Err(e) = self.store.unlink_activity(activity_id).await {
            error!(
                target: "reconcile",
                activity = %activity_id,
                error = %format!("{e:#}"),
                "could not undo link"
            );
        }
    }

    async fn relink(&self, activity_id: &str, deal_id: &str) {
        if let Err(e) = self.store.link_activity(activity_id, deal_id).await {
            error!(
                target: "reconcile",
                activity = %activity_id,
                deal = %deal_id,
                error = %format!("{e:#}"),
                "could not restore link after failed rollback"
            );
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
