/// Decimal places kept on each published probability.
pub const PROBABILITY_DECIMALS: i32 = 2;

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Converts ratings into win probabilities (percent) that sum to exactly 100.
///
/// Each entrant's raw strength is `10^(R/400)`; strengths are normalized
/// across the field and rounded to [`PROBABILITY_DECIMALS`]. Whatever rounding
/// leaves over is given to the highest-probability entrant (the first one on
/// ties). The output keeps the input order. An empty field yields an empty vec.
pub fn win_probabilities(field: &[(String, f64)]) -> Vec<(String, f64)> {
    if field.is_empty() {
        return Vec::new();
    }

    // Shift by the best rating so strong fields cannot overflow.
    let top = field
        .iter()
        .map(|(_, r)| *r)
        .fold(f64::NEG_INFINITY, f64::max);
    let strengths: Vec<f64> = field
        .iter()
        .map(|(_, r)| 10f64.powf((r - top) / 400.0))
        .collect();
    let total: f64 = strengths.iter().sum();

    let mut out: Vec<(String, f64)> = field
        .iter()
        .zip(&strengths)
        .map(|((id, _), s)| (id.clone(), round_to(s / total * 100.0, PROBABILITY_DECIMALS)))
        .collect();

    let leader = out
        .iter()
        .enumerate()
        .fold(0, |best, (i, (_, p))| if *p > out[best].1 { i } else { best });
    let remainder = 100.0 - out.iter().map(|(_, p)| p).sum::<f64>();
    out[leader].1 = round_to(out[leader].1 + remainder, PROBABILITY_DECIMALS);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(ratings: &[(&str, f64)]) -> Vec<(String, f64)> {
        ratings.iter().map(|(id, r)| (id.to_string(), *r)).collect()
    }

    fn sum(probs: &[(String, f64)]) -> f64 {
        probs.iter().map(|(_, p)| p).sum()
    }

    #[test]
    fn equal_ratings_split_evenly() {
        let probs = win_probabilities(&field(&[("a", 1500.0), ("b", 1500.0)]));
        assert_eq!(probs[0].1, 50.0);
        assert_eq!(probs[1].1, 50.0);
    }

    #[test]
    fn remainder_goes_to_the_favourite() {
        // thirds round to 33.33 each, leaving 0.01
        let probs = win_probabilities(&field(&[("a", 1500.0), ("b", 1500.0), ("c", 1500.0)]));
        assert!((sum(&probs) - 100.0).abs() < 1e-9);
        assert_eq!(probs[0].1, 33.34);
        assert_eq!(probs[1].1, 33.33);
    }

    #[test]
    fn full_grid_sums_to_one_hundred() {
        let grid: Vec<(String, f64)> = (0..20)
            .map(|i| (format!("d{i}"), 1350.0 + 17.3 * i as f64))
            .collect();
        let probs = win_probabilities(&grid);
        assert_eq!(probs.len(), 20);
        assert!((sum(&probs) - 100.0).abs() < 1e-9);
        assert!(probs.iter().all(|(_, p)| (0.0..=100.0).contains(p)));
        // order preserved and strongest last
        assert_eq!(probs[19].0, "d19");
        assert!(probs[19].1 > probs[0].1);
    }

    #[test]
    fn huge_ratings_do_not_overflow() {
        let probs = win_probabilities(&field(&[("a", 250_000.0), ("b", 1500.0)]));
        assert_eq!(probs[0].1, 100.0);
        assert_eq!(probs[1].1, 0.0);
    }

    #[test]
    fn empty_field() {
        assert!(win_probabilities(&[]).is_empty());
    }
}
