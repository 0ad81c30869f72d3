use crate::config::RuleStage;

/// A named predicate over the store plus the largest acceptable value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub name: String,
    /// Read-only SQL yielding one number. May use `:as_of`,
    /// `:model_version` and `:rating_floor`.
    pub predicate: String,
    pub fail_threshold: f64,
    pub stage: RuleStage,
}

impl ValidationRule {
    pub fn new(name: &str, stage: RuleStage, predicate: &str) -> Self {
        Self {
            name: name.to_string(),
            predicate: predicate.to_string(),
            fail_threshold: 0.0,
            stage,
        }
    }
}

/// Results may lag the race by a few days before a scheduled race in the
/// past counts as stale.
pub const RESULTS_GRACE_DAYS: u32 = 3;

pub fn builtin_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new(
            "races_scheduled_in_past",
            RuleStage::Ingest,
            "SELECT COUNT(*) FROM races
             WHERE status = 'scheduled' AND date < date(:as_of, '-3 days')",
        ),
        ValidationRule::new(
            "results_for_unknown_race",
            RuleStage::Ingest,
            "SELECT COUNT(*) FROM race_results rr
             LEFT JOIN races r ON r.id = rr.race_id
             WHERE r.id IS NULL",
        ),
        ValidationRule::new(
            "duplicate_finishing_positions",
            RuleStage::Ingest,
            "SELECT COUNT(*) FROM (
                SELECT race_id, finishing_position FROM race_results
                WHERE finishing_position IS NOT NULL
                GROUP BY race_id, finishing_position
                HAVING COUNT(*) > 1)",
        ),
        ValidationRule::new(
            "completed_races_without_results",
            RuleStage::Ingest,
            "SELECT COUNT(*) FROM races r
             WHERE r.status = 'completed'
               AND NOT EXISTS (SELECT 1 FROM race_results rr WHERE rr.race_id = r.id)",
        ),
        ValidationRule::new(
            "ratings_below_floor",
            RuleStage::Predictions,
            "SELECT COUNT(*) FROM ratings WHERE value < :rating_floor",
        ),
        ValidationRule::new(
            "prediction_sums_off",
            RuleStage::Predictions,
            "SELECT COUNT(*) FROM (
                SELECT race_id, SUM(win_probability) AS total FROM predictions
                WHERE model_version = :model_version
                GROUP BY race_id
                HAVING ABS(total - 100.0) > 0.005)",
        ),
        ValidationRule::new(
            "predictions_out_of_range",
            RuleStage::Predictions,
            "SELECT COUNT(*) FROM predictions
             WHERE model_version = :model_version
               AND (win_probability < 0 OR win_probability > 100)",
        ),
    ]
}
