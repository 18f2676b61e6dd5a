// src/scoring/mod.rs
//! Reconciliation scoring: three independent component scorers feeding one
//! summed, classified [`MatchScore`].
//!
//! Everything here is pure and synchronous; callers may score pairs from any
//! number of threads.

pub mod amount;
pub mod confidence;
pub mod date;
pub mod name;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::records::{Activity, Deal};

pub use crate::scoring::amount::amount_score;
pub use crate::scoring::confidence::{classify, ConfidenceLevel, MatchScore};
pub use crate::scoring::date::{date_score, parse_timestamp};
pub use crate::scoring::name::{name_score, name_similarity, normalize_name};

/// One side of a candidate pair: what the scorer needs from an activity or a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSide {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "value")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub date: String,
}

impl From<&Activity> for PairSide {
    fn from(a: &Activity) -> Self {
        Self {
            name: a.client_name.clone(),
            amount: a.amount,
            date: a.date.clone(),
        }
    }
}

impl From<&Deal> for PairSide {
    fn from(d: &Deal) -> Self {
        Self {
            name: d.name.clone(),
            amount: Some(d.value),
            date: d.stage_changed_at.clone(),
        }
    }
}

/// Score one candidate pair.
pub fn score_pair(left: &PairSide, right: &PairSide) -> MatchScore {
    let (_, name_pts) = name_score(&left.name, &right.name);
    let (_, date_pts) = date_score(&left.date, &right.date);
    let (_, amount_pts) = amount_score(left.amount, right.amount);
    let score = MatchScore::from_components(name_pts, date_pts, amount_pts);

    counter!("reconcile_pairs_scored_total", "tier" => score.confidence_level.as_str())
        .increment(1);
    score
}

/// Score an activity against a deal.
pub fn score_records(activity: &Activity, deal: &Deal) -> MatchScore {
    score_pair(&PairSide::from(activity), &PairSide::from(deal))
}
