//! Confidence tiers and the summed match score.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const HIGH_CONFIDENCE_MIN: u32 = 80;
const MEDIUM_CONFIDENCE_MIN: u32 = 60;

/// Tier of a summed score. Ordered low < medium < high so policy checks can
/// use `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    LowConfidence,
    MediumConfidence,
    HighConfidence,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::LowConfidence => "low_confidence",
            ConfidenceLevel::MediumConfidence => "medium_confidence",
            ConfidenceLevel::HighConfidence => "high_confidence",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfidenceLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "low_confidence" => Ok(ConfidenceLevel::LowConfidence),
            "medium" | "medium_confidence" => Ok(ConfidenceLevel::MediumConfidence),
            "high" | "high_confidence" => Ok(ConfidenceLevel::HighConfidence),
            other => anyhow::bail!("unknown confidence level `{other}`"),
        }
    }
}

/// Step function from total points to tier. Closed at the lower bound.
pub fn classify(total: u32) -> ConfidenceLevel {
    if total >= HIGH_CONFIDENCE_MIN {
        ConfidenceLevel::HighConfidence
    } else if total >= MEDIUM_CONFIDENCE_MIN {
        ConfidenceLevel::MediumConfidence
    } else {
        ConfidenceLevel::LowConfidence
    }
}

/// Component scores of one activity/deal pair plus their sum and tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchScore {
    pub name_score: u32,
    pub date_score: u32,
    pub amount_score: u32,
    pub total_score: u32,
    pub confidence_level: ConfidenceLevel,
}

impl MatchScore {
    /// Sum the components and classify. The only way to build a score, so
    /// `total_score` always equals the component sum.
    pub fn from_components(name_score: u32, date_score: u32, amount_score: u32) -> Self {
        let total_score = name_score + date_score + amount_score;
        Self {
            name_score,
            date_score,
            amount_score,
            total_score,
            confidence_level: classify(total_score),
        }
    }
}
