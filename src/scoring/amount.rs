//! Amount similarity: percentage difference relative to the larger amount.

/// Step table: (max fractional difference, points).
const AMOUNT_POINTS: [(f64, u32); 3] = [(0.05, 30), (0.10, 20), (0.20, 10)];

/// `|a - b| / max(a, b)`, or `None` when the comparison is meaningless
/// (missing, non-finite, zero or negative on either side).
pub fn percent_difference(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    if !a.is_finite() || !b.is_finite() || a <= 0.0 || b <= 0.0 {
        return None;
    }
    Some((a - b).abs() / a.max(b))
}

/// Map a fractional difference to points.
pub fn points_for_difference(diff: f64) -> u32 {
    AMOUNT_POINTS
        .iter()
        .find(|(max, _)| diff <= *max)
        .map(|(_, pts)| *pts)
        .unwrap_or(0)
}

/// Score two amounts. Returns `(percent_difference, points)`.
pub fn amount_score(a: Option<f64>, b: Option<f64>) -> (Option<f64>, u32) {
    match percent_difference(a, b) {
        Some(diff) => (Some(diff), points_for_difference(diff)),
        None => (None, 0),
    }
}
