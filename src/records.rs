//! records.rs: Activity / Deal records as they come out of the record store.
//!
//! Enum fields are tolerant: any string the backend sends that we don't know
//! lands in `Other` instead of failing the whole payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of logged sales action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Sale,
    Outbound,
    Meeting,
    Proposal,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Completed,
    Pending,
    Cancelled,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Active,
    Won,
    Lost,
    #[serde(other)]
    Other,
}

/// Pipeline stage labels the reconciler writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    #[serde(rename = "Proposal")]
    Proposal,
    #[serde(rename = "Closed Won")]
    ClosedWon,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Proposal => "Proposal",
            PipelineStage::ClosedWon => "Closed Won",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logged sales action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    /// Client / organization name as typed by the rep.
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub amount: Option<f64>,
    /// Timestamp as stored by the backend (ISO 8601 recommended).
    pub date: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
}

impl Activity {
    /// Sale activities without a deal link are the ones reconciliation cares about.
    pub fn is_orphan_sale(&self) -> bool {
        self.activity_type == ActivityType::Sale && self.deal_id.is_none()
    }
}

/// A pipeline opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    /// Organization name.
    #[serde(default)]
    pub name: String,
    pub value: f64,
    /// Free-form stage label; the pipeline has more stages than we assign.
    pub stage: String,
    pub status: DealStatus,
    pub stage_changed_at: String,
    pub owner_id: String,
}

/// Insert payload for a new deal. Every field is explicit; no optional keys
/// get bolted on at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeal {
    pub name: String,
    pub value: f64,
    pub stage: PipelineStage,
    pub status: DealStatus,
    pub owner_id: String,
}
