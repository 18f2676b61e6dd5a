//! Record store: the query / insert / update surface the reconciler needs from
//! the backend, plus an in-memory implementation for the service binary and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::records::{Activity, Deal, NewDeal};

pub const ENV_RECONCILE_SEED_PATH: &str = "RECONCILE_SEED_PATH";

/// Failures callers are expected to branch on. Everything else is plain `anyhow`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn activity_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "activity",
            id: id.to_string(),
        }
    }

    pub fn deal_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "deal",
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Sale activities with no deal link.
    async fn orphan_activities(&self) -> Result<Vec<Activity>>;
    /// Deals no activity links to.
    async fn orphan_deals(&self) -> Result<Vec<Deal>>;
    async fn activity(&self, id: &str) -> Result<Option<Activity>>;
    async fn deal(&self, id: &str) -> Result<Option<Deal>>;
    /// Activities currently linked to `deal_id`.
    async fn activities_for_deal(&self, deal_id: &str) -> Result<Vec<Activity>>;
    /// Link an unlinked activity. An activity that already carries a deal
    /// link is a `Conflict`; the existing link is never overwritten.
    async fn link_activity(&self, activity_id: &str, deal_id: &str) -> Result<()>;
    async fn unlink_activity(&self, activity_id: &str) -> Result<()>;
    async fn set_deal_stage(&self, deal_id: &str, stage: &str, changed_at: &str) -> Result<()>;
    async fn insert_deal(&self, deal: NewDeal) -> Result<Deal>;
    async fn delete_deal(&self, deal_id: &str) -> Result<()>;
}

pub type DynRecordStore = Arc<dyn RecordStore>;

/// Fixture shape for seeding: `{"activities": [...], "deals": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub deals: Vec<Deal>,
}

#[derive(Debug, Default)]
struct State {
    activities: Vec<Activity>,
    deals: Vec<Deal>,
    next_deal: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<State>,
}

impl InMemoryStore {
    pub fn new(activities: Vec<Activity>, deals: Vec<Deal>) -> Self {
        Self {
            inner: Mutex::new(State {
                activities,
                deals,
                next_deal: 1,
            }),
        }
    }

    pub fn from_seed(seed: Seed) -> Self {
        Self::new(seed.activities, seed.deals)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let seed: Seed = serde_json::from_str(s).context("parsing store seed")?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading store seed from {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Seed from `$RECONCILE_SEED_PATH` if set, otherwise start empty.
    pub fn from_env() -> Result<Self> {
        match std::env::var(ENV_RECONCILE_SEED_PATH) {
            Ok(p) => Self::from_json_file(Path::new(&p)),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Snapshot of every activity (for diagnostics and tests).
    pub fn activities(&self) -> Vec<Activity> {
        self.state().activities.clone()
    }

    /// Snapshot of every deal (for diagnostics and tests).
    pub fn deals(&self) -> Vec<Deal> {
        self.state().deals.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn orphan_activities(&self) -> Result<Vec<Activity>> {
        Ok(self
            .state()
            .activities
            .iter()
            .filter(|a| a.is_orphan_sale())
            .cloned()
            .collect())
    }

    async fn orphan_deals(&self) -> Result<Vec<Deal>> {
        let st = self.state();
        let linked: HashSet<&str> = st
            .activities
            .iter()
            .filter_map(|a| a.deal_id.as_deref())
            .collect();
        Ok(st
            .deals
            .iter()
            .filter(|d| !linked.contains(d.id.as_str()))
            .cloned()
            .collect())
    }

    async fn activity(&self, id: &str) -> Result<Option<Activity>> {
        Ok(self.state().activities.iter().find(|a| a.id == id).cloned())
    }

    async fn deal(&self, id: &str) -> Result<Option<Deal>> {
        Ok(self.state().deals.iter().find(|d| d.id == id).cloned())
    }

    async fn activities_for_deal(&self, deal_id: &str) -> Result<Vec<Activity>> {
        Ok(self
            .state()
            .activities
            .iter()
            .filter(|a| a.deal_id.as_deref() == Some(deal_id))
            .cloned()
            .collect())
    }

    async fn link_activity(&self, activity_id: &str, deal_id: &str) -> Result<()> {
        let mut st = self.state();
        if !st.deals.iter().any(|d| d.id == deal_id) {
            return Err(StoreError::deal_not_found(deal_id).into());
        }
        let activity = st
            .activities
            .iter_mut()
            .find(|a| a.id == activity_id)
            .ok_or_else(|| StoreError::activity_not_found(activity_id))?;
        if let Some(existing) = &activity.deal_id {
            return Err(StoreError::Conflict(format!(
                "activity `{activity_id}` is already linked to deal `{existing}`"
            ))
            .into());
        }
        activity.deal_id = Some(deal_id.to_string());
        Ok(())
    }

    async fn unlink_activity(&self, activity_id: &str) -> Result<()> {
        let mut st = self.state();
        let activity = st
            .activities
            .iter_mut()
            .find(|a| a.id == activity_id)
            .ok_or_else(|| StoreError::activity_not_found(activity_id))?;
        activity.deal_id = None;
        Ok(())
    }

    async fn set_deal_stage(&self, deal_id: &str, stage: &str, changed_at: &str) -> Result<()> {
        let mut st = self.state();
        let deal = st
            .deals
            .iter_mut()
            .find(|d| d.id == deal_id)
            .ok_or_else(|| StoreError::deal_not_found(deal_id))?;
        deal.stage = stage.to_string();
        deal.stage_changed_at = changed_at.to_string();
        Ok(())
    }

    async fn insert_deal(&self, deal: NewDeal) -> Result<Deal> {
        let mut st = self.state();
        let mut id = format!("deal-{}", st.next_deal);
        while st.deals.iter().any(|d| d.id == id) {
            st.next_deal += 1;
            id = format!("deal-{}", st.next_deal);
        }
        st.next_deal += 1;

        let row = Deal {
            id,
            name: deal.name,
            value: deal.value,
            stage: deal.stage.as_str().to_string(),
            status: deal.status,
            stage_changed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            owner_id: deal.owner_id,
        };
        st.deals.push(row.clone());
        Ok(row)
    }

    async fn delete_deal(&self, deal_id: &str) -> Result<()> {
        let mut st = self.state();
        if st
            .activities
            .iter()
            .any(|a| a.deal_id.as_deref() == Some(deal_id))
        {
            return Err(StoreError::Conflict(format!(
                "deal `{deal_id}` still has linked activities"
            ))
            .into());
        }
        let before = st.deals.len();
        st.deals.retain(|d| d.id != deal_id);
        if st.deals.len() == before {
            return Err(StoreError::deal_not_found(deal_id).into());
        }
        Ok(())
    }
}
