//! # Reconciliation Planner
//! Pure mapping `(orphan activities, orphan deals, policy)` → proposed matches.
//! No I/O, so runs are reproducible in tests and dry-runs.
//!
//! Policy: score every pair, keep each activity's best few, then assign
//! greedily by descending total so no deal or activity is used twice.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::ReconcileConfig;
use crate::records::{Activity, Deal};
use crate::scoring::{score_pair, ConfidenceLevel, MatchScore, PairSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAction {
    AutoLink,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedMatch {
    pub activity_id: String,
    pub deal_id: String,
    pub score: MatchScore,
    pub action: MatchAction,
}

/// Scored pairs per tier (all pairs, before filtering).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
}

impl TierCounts {
    fn add(&mut self, level: ConfidenceLevel) {
        match level {
            ConfidenceLevel::HighConfidence => self.high_confidence += 1,
            ConfidenceLevel::MediumConfidence => self.medium_confidence += 1,
            ConfidenceLevel::LowConfidence => self.low_confidence += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub matches: Vec<ProposedMatch>,
    pub unmatched_activities: Vec<String>,
    pub unmatched_deals: Vec<String>,
    pub pairs_scored: usize,
    pub tier_counts: TierCounts,
    /// Orphan activities left for a later run because of `batch_size`.
    pub deferred_activities: usize,
}

struct Candidate {
    activity: usize,
    deal: usize,
    score: MatchScore,
}

/// Build a plan. Deterministic for identical inputs.
pub fn plan(activities: &[Activity], deals: &[Deal], cfg: &ReconcileConfig) -> ReconciliationPlan {
    let batch = &activities[..activities.len().min(cfg.batch_size)];
    let deal_sides: Vec<PairSide> = deals.iter().map(PairSide::from).collect();

    let mut out = ReconciliationPlan {
        deferred_activities: activities.len() - batch.len(),
        ..Default::default()
    };

    // 1) Score and keep best N per activity
    let mut kept: Vec<Candidate> = Vec::new();
    for (ai, activity) in batch.iter().enumerate() {
        let side = PairSide::from(activity);
        let mut per_activity: Vec<Candidate> = deal_sides
            .iter()
            .enumerate()
            .map(|(di, ds)| Candidate {
                activity: ai,
                deal: di,
                score: score_pair(&side, ds),
            })
            .collect();

        out.pairs_scored += per_activity.len();
        for c in &per_activity {
            out.tier_counts.add(c.score.confidence_level);
        }

        per_activity.retain(|c| c.score.confidence_level >= cfg.review_min);
        per_activity.sort_by(|x, y| {
            y.score
                .total_score
                .cmp(&x.score.total_score)
                .then_with(|| deals[x.deal].id.cmp(&deals[y.deal].id))
        });
        per_activity.truncate(cfg.max_candidates);
        kept.extend(per_activity);
    }

    // 2) Greedy one-to-one assignment
    kept.sort_by(|x, y| rank(x, y, batch, deals));
    let mut activity_used = vec![false; batch.len()];
    let mut deal_used = vec![false; deals.len()];
    for c in kept {
        if activity_used[c.activity] || deal_used[c.deal] {
            continue;
        }
        activity_used[c.activity] = true;
        deal_used[c.deal] = true;

        let action = if c.score.confidence_level >= cfg.auto_link_min {
            MatchAction::AutoLink
        } else {
            MatchAction::Review
        };
        out.matches.push(ProposedMatch {
            activity_id: batch[c.activity].id.clone(),
            deal_id: deals[c.deal].id.clone(),
            score: c.score,
            action,
        });
    }

    // 3) Leftovers
    out.unmatched_activities = batch
        .iter()
        .zip(&activity_used)
        .filter(|(_, used)| !**used)
        .map(|(a, _)| a.id.clone())
        .collect();
    out.unmatched_deals = deals
        .iter()
        .zip(&deal_used)
        .filter(|(_, used)| !**used)
        .map(|(d, _)| d.id.clone())
        .collect();

    out
}

fn rank(x: &Candidate, y: &Candidate, activities: &[Activity], deals: &[Deal]) -> Ordering {
    y.score
        .total_score
        .cmp(&x.score.total_score)
        .then_with(|| activities[x.activity].id.cmp(&activities[y.activity].id))
        .then_with(|| deals[x.deal].id.cmp(&deals[y.deal].id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ActivityStatus, ActivityType, DealStatus};

    fn act(id: &str, name: &str, amount: f64, date: &str) -> Activity {
        Activity {
            id: id.into(),
            client_name: name.into(),
            amount: Some(amount),
            date: date.into(),
            activity_type: ActivityType::Sale,
            status: ActivityStatus::Completed,
            deal_id: None,
        }
    }

    fn deal(id: &str, name: &str, value: f64, date: &str) -> Deal {
        Deal {
            id: id.into(),
            name: name.into(),
            value,
            stage: "Proposal".into(),
            status: DealStatus::Active,
            stage_changed_at: date.into(),
            owner_id: "u1".into(),
        }
    }

    #[test]
    fn exact_pair_auto_links() {
        let acts = [act("a1", "Viewpoint Construction", 10_000.0, "2024-01-15")];
        let deals = [
            deal("d1", "Viewpoint Construction", 10_000.0, "2024-01-15"),
            deal("d2", "Harbor Freight", 900.0, "2024-03-01"),
        ];
        let p = plan(&acts, &deals, &ReconcileConfig::default());
        assert_eq!(p.pairs_scored, 2);
        assert_eq!(p.matches.len(), 1);
        assert_eq!(p.matches[0].deal_id, "d1");
        assert_eq!(p.matches[0].action, MatchAction::AutoLink);
        assert_eq!(p.unmatched_deals, vec!["d2".to_string()]);
        assert!(p.unmatched_activities.is_empty());
    }

    #[test]
    fn medium_goes_to_review() {
        let acts = [act("a1", "ViewPoint VC", 10_000.0, "2024-01-15")];
        let deals = [deal("d1", "Viewpoint Construction", 10_500.0, "2024-01-16")];
        let p = plan(&acts, &deals, &ReconcileConfig::default());
        assert_eq!(p.matches.len(), 1);
        assert_eq!(p.matches[0].action, MatchAction::Review);
        assert_eq!(p.tier_counts.medium_confidence, 1);
    }

    #[test]
    fn low_pairs_are_not_proposed() {
        let acts = [act("a1", "Acme Plumbing", 1_000.0, "2024-01-15")];
        let deals = [deal("d1", "Zyxq Bkg", 10_000.0, "2024-02-15")];
        let p = plan(&acts, &deals, &ReconcileConfig::default());
        assert!(p.matches.is_empty());
        assert_eq!(p.unmatched_activities, vec!["a1".to_string()]);
        assert_eq!(p.tier_counts.low_confidence, 1);
    }

    #[test]
    fn one_deal_never_goes_to_two_activities() {
        let acts = [
            act("a1", "Acme", 100.0, "2024-01-15"),
            act("a2", "Acme", 100.0, "2024-01-15"),
        ];
        let deals = [deal("d1", "Acme", 100.0, "2024-01-15")];
        let p = plan(&acts, &deals, &ReconcileConfig::default());
        assert_eq!(p.matches.len(), 1);
        // tie on total → lowest activity id wins
        assert_eq!(p.matches[0].activity_id, "a1");
        assert_eq!(p.unmatched_activities, vec!["a2".to_string()]);
    }

    #[test]
    fn greedy_prefers_stronger_pair() {
        let acts = [
            act("a1", "Acme", 100.0, "2024-01-15"),
            act("a2", "Acme", 100.0, "2024-01-20"),
        ];
        let deals = [
            deal("d1", "Acme", 100.0, "2024-01-20"),
            deal("d2", "Acme", 100.0, "2024-01-15"),
        ];
        let p = plan(&acts, &deals, &ReconcileConfig::default());
        let pairs: Vec<_> = p
            .matches
            .iter()
            .map(|m| (m.activity_id.as_str(), m.deal_id.as_str()))
            .collect();
        assert_eq!(pairs, [("a1", "d2"), ("a2", "d1")]);
    }

    #[test]
    fn batch_size_defers_the_rest() {
        let acts = [
            act("a1", "Acme", 100.0, "2024-01-15"),
            act("a2", "Beta", 100.0, "2024-01-15"),
            act("a3", "Gamma", 100.0, "2024-01-15"),
        ];
        let cfg = ReconcileConfig {
            batch_size: 2,
            ..Default::default()
        };
        let p = plan(&acts, &[], &cfg);
        assert_eq!(p.deferred_activities, 1);
        assert_eq!(p.unmatched_activities.len(), 2);
        assert_eq!(p.pairs_scored, 0);
    }

    #[test]
    fn lowering_auto_link_min_turns_review_into_link() {
        let acts = [act("a1", "ViewPoint VC", 10_000.0, "2024-01-15")];
        let deals = [deal("d1", "Viewpoint Construction", 10_500.0, "2024-01-16")];
        let cfg = ReconcileConfig {
            auto_link_min: ConfidenceLevel::MediumConfidence,
            ..Default::default()
        };
        let p = plan(&acts, &deals, &cfg);
        assert_eq!(p.matches[0].action, MatchAction::AutoLink);
    }
}
