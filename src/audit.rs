//! audit.rs: bounded in-memory trail of applied reconciliation actions.
//! Each entry keeps enough of the "before" state to undo itself.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::scoring::MatchScore;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AutoLink,
    ManualLink,
    CreateDeal,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AutoLink => "auto_link",
            AuditAction::ManualLink => "manual_link",
            AuditAction::CreateDeal => "create_deal",
        }
    }
}

/// What the caller knows when recording; id and timestamp are assigned by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub action: AuditAction,
    pub actor: String,
    pub activity_id: String,
    pub deal_id: String,
    pub score: Option<MatchScore>,
    /// Deal stage before we relabelled it (None = untouched).
    pub previous_stage: Option<String>,
    pub previous_stage_changed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub ts_unix: u64,
    pub action: AuditAction,
    pub actor: String,
    pub activity_id: String,
    pub deal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<MatchScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_stage_changed_at: Option<String>,
    pub rolled_back: bool,
}

#[derive(Debug)]
struct Inner {
    entries: Vec<AuditEntry>,
    next_id: u64,
}

#[derive(Debug)]
pub struct AuditLog {
    inner: Mutex<Inner>,
    cap: usize,
}

impl AuditLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 100_000);
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::with_capacity(cap.min(10_000)),
                next_id: 1,
            }),
            cap,
        }
    }

    pub fn record(&self, draft: AuditDraft) -> AuditEntry {
        let mut g = self.lock();
        let entry = AuditEntry {
            id: g.next_id,
            ts_unix: now_unix(),
            action: draft.action,
            actor: draft.actor,
            activity_id: draft.activity_id,
            deal_id: draft.deal_id,
            score: draft.score,
            previous_stage: draft.previous_stage,
            previous_stage_changed_at: draft.previous_stage_changed_at,
            rolled_back: false,
        };
        g.next_id += 1;
        g.entries.push(entry.clone());
        if g.entries.len() > self.cap {
            let excess = g.entries.len() - self.cap;
            g.entries.drain(0..excess);
        }
        entry
    }

    pub fn get(&self, id: u64) -> Option<AuditEntry> {
        self.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Flag an entry as undone. Fails if it was evicted or already rolled back.
    pub fn mark_rolled_back(&self, id: u64) -> Result<AuditEntry, StoreError> {
        let mut g = self.lock();
        let entry = g
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "audit entry",
                id: id.to_string(),
            })?;
        if entry.rolled_back {
            return Err(StoreError::Conflict(format!(
                "audit entry {id} already rolled back"
            )));
        }
        entry.rolled_back = true;
        Ok(entry.clone())
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<AuditEntry> {
        let g = self.lock();
        let start = g.entries.len().saturating_sub(n);
        g.entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
