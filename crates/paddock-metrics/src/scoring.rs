//! Proper scoring rules for evaluating published win probabilities.
//!
//! Inputs are `(probability_percent, outcome)` pairs where `outcome` is 1 for
//! the actual winner and 0 for everyone else.

/// Probabilities are clamped into `[EPS, 1 - EPS]` before taking logs.
pub const LOG_LOSS_EPS: f64 = 1e-15;

/// Mean squared error between `probability / 100` and the binary outcome.
/// Returns `None` for an empty sample.
pub fn brier_score(pairs: &[(f64, u8)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs
        .iter()
        .map(|(pct, outcome)| {
            let diff = pct / 100.0 - f64::from(*outcome);
            diff * diff
        })
        .sum();
    Some(total / pairs.len() as f64)
}

/// Mean binary cross-entropy over all driver-race pairs.
/// Returns `None` for an empty sample.
pub fn log_loss(pairs: &[(f64, u8)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs
        .iter()
        .map(|(pct, outcome)| {
            let p = (pct / 100.0).clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            if *outcome == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    Some(total / pairs.len() as f64)
}
