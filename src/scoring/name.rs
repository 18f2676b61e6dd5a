//! Organization-name similarity.
//!
//! Character-set Jaccard over normalized names. Word order doesn't matter and
//! small spelling drift ("Viewpoint" vs "ViewPoint VC") still overlaps heavily.

use std::collections::HashSet;

/// Step table: (minimum similarity, points). First row that fits wins.
const NAME_POINTS: [(f64, u32); 3] = [(0.90, 40), (0.80, 30), (0.70, 20)];

/// Trim + lowercase. Empty in, empty out.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Similarity in [0,1] between two raw names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    let inter = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    inter as f64 / union as f64
}

/// Map a similarity ratio to points.
pub fn points_for_similarity(similarity: f64) -> u32 {
    NAME_POINTS
        .iter()
        .find(|(min, _)| similarity >= *min)
        .map(|(_, pts)| *pts)
        .unwrap_or(0)
}

/// Convenience: similarity + points in one go.
pub fn name_score(a: &str, b: &str) -> (f64, u32) {
    let sim = name_similarity(a, b);
    (sim, points_for_similarity(sim))
}
