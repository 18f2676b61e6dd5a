//! Stage assignment: fixed lookup from activity/deal status to a pipeline stage.
//!
//! Anything not explicitly mapped falls through to `Proposal`. The fall-through
//! on an unrecognised (`Other`) input is logged so misclassification shows up.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::{ActivityStatus, ActivityType, DealStatus, PipelineStage};

/// Stage for deals created by reconciliation. Policy, not derived.
pub const RECONCILED_DEAL_STAGE: PipelineStage = PipelineStage::ClosedWon;

/// Stage implied by an activity.
pub fn stage_for_activity(activity_type: ActivityType, status: ActivityStatus) -> PipelineStage {
    match (activity_type, status) {
        (ActivityType::Sale, ActivityStatus::Completed) => PipelineStage::ClosedWon,
        (ActivityType::Other, _) | (_, ActivityStatus::Other) => {
            debug!(target: "reconcile", ?activity_type, ?status, "unmapped activity; defaulting to Proposal");
            PipelineStage::Proposal
        }
        _ => PipelineStage::Proposal,
    }
}

/// Stage implied by a deal status.
pub fn stage_for_deal(status: DealStatus) -> PipelineStage {
    match status {
        DealStatus::Won => PipelineStage::ClosedWon,
        DealStatus::Other => {
            debug!(target: "reconcile", "unmapped deal status; defaulting to Proposal");
            PipelineStage::Proposal
        }
        DealStatus::Active | DealStatus::Lost => PipelineStage::Proposal,
    }
}

/// Tagged request body for `/stage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageRequest {
    Activity {
        activity_type: ActivityType,
        status: ActivityStatus,
    },
    Deal {
        status: DealStatus,
    },
}

impl StageRequest {
    pub fn assign(&self) -> PipelineStage {
        match *self {
            StageRequest::Activity {
                activity_type,
                status,
            } => stage_for_activity(activity_type, status),
            StageRequest::Deal { status } => stage_for_deal(status),
        }
    }
}
