use crate::config::{RuleStage, ValidationConfig};
use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::RunId;
use crate::storage::Store;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::ToSql;
use serde::Serialize;

pub mod rules;

pub use rules::{builtin_rules, ValidationRule};

/// Values bound to named parameters of rule predicates.
#[derive(Debug, Clone)]
pub struct RuleParams {
    pub as_of: NaiveDate,
    pub model_version: String,
    pub rating_floor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failed_rules(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.rule.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    rules: Vec<ValidationRule>,
}

impl ValidationEngine {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules (unless disabled) followed by the configured ones.
    pub fn from_config(cfg: &ValidationConfig) -> Self {
        let mut rules = if cfg.builtin_rules {
            builtin_rules()
        } else {
            Vec::new()
        };
        rules.extend(cfg.rules.iter().map(|r| ValidationRule {
            name: r.name.clone(),
            predicate: r.predicate.clone(),
            fail_threshold: r.fail_threshold,
            stage: r.stage,
        }));
        Self { rules }
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Evaluates every rule of `stage` and appends one `validation_results`
    /// row per rule.
    ///
    /// Never stops at the first failure. A predicate that cannot be evaluated
    /// fails its rule with the error as message. A NULL result counts as 0.
    /// Only failing to record an outcome is an error.
    pub fn run(
        &self,
        store: &Store,
        params: &RuleParams,
        stage: RuleStage,
        run_id: Option<RunId>,
    ) -> anyhow::Result<ValidationReport> {
        let named: [(&str, &dyn ToSql); 3] = [
            (":as_of", &params.as_of),
            (":model_version", &params.model_version),
            (":rating_floor", &params.rating_floor),
        ];

        let mut report = ValidationReport::default();
        for rule in self.rules.iter().filter(|r| r.stage.includes(stage)) {
            let outcome = match store.scalar_query(&rule.predicate, &named) {
                Ok(value) => {
                    let observed = value.unwrap_or(0.0);
                    let passed = observed <= rule.fail_threshold;
                    RuleOutcome {
                        rule: rule.name.clone(),
                        passed,
                        observed: Some(observed),
                        threshold: rule.fail_threshold,
                        message: (!passed).then(|| {
                            format!("observed {} exceeds threshold {}", observed, rule.fail_threshold)
                        }),
                    }
                }
                Err(e) => RuleOutcome {
                    rule: rule.name.clone(),
                    passed: false,
                    observed: None,
                    threshold: rule.fail_threshold,
                    message: Some(format!("predicate error: {:#}", e)),
                },
            };

            store.insert_validation_result(
                run_id,
                &outcome.rule,
                outcome.passed,
                outcome.observed,
                outcome.message.as_deref(),
            )?;
            if outcome.passed {
                tracing::debug!(event = "rule_passed", rule = %outcome.rule);
            } else {
                tracing::warn!(
                    event = "rule_failed",
                    rule = %outcome.rule,
                    observed = outcome.observed,
                    threshold = outcome.threshold,
                    message = outcome.message.as_deref().unwrap_or(""),
                );
            }
            report.outcomes.push(outcome);
        }
        Ok(report)
    }
}

/// DAG task wrapping [`ValidationEngine`] for one stage of a pipeline.
pub struct ValidationTask {
    pub stage: RuleStage,
}

#[async_trait]
impl TaskHandler for ValidationTask {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let engine = ValidationEngine::from_config(&ctx.config.validation);
        let params = RuleParams {
            as_of: ctx.as_of,
            model_version: ctx.model_version().to_string(),
            rating_floor: ctx.config.elo.rating_floor,
        };
        let report = engine
            .run(&ctx.store, &params, self.stage, Some(ctx.run_id))
            .map_err(TaskError::store)?;
        if report.passed() {
            Ok(format!("{} rule(s) passed", report.outcomes.len()))
        } else {
            Err(TaskError::Validation {
                failed_rules: report.failed_rules(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RaceStatus, RaceUpsert};

    fn store() -> Store {
        let s = Store::memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    fn params(as_of: &str) -> RuleParams {
        RuleParams {
            as_of: NaiveDate::parse_from_str(as_of, "%Y-%m-%d").unwrap(),
            model_version: "elo-v1".into(),
            rating_floor: 100.0,
        }
    }

    #[test]
    fn reports_every_failing_rule() {
        let s = store();
        s.upsert_race(&RaceUpsert {
            season_year: 2025,
            round_number: 1,
            name: "Bahrain".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            circuit_id: "bahrain".into(),
            status: RaceStatus::Scheduled,
        })
        .unwrap();

        let engine = ValidationEngine::new(vec![
            ValidationRule::new("always_one", RuleStage::All, "SELECT 1"),
            ValidationRule::new(
                "stale_races",
                RuleStage::All,
                "SELECT COUNT(*) FROM races WHERE status = 'scheduled' AND date < :as_of",
            ),
            ValidationRule::new("broken", RuleStage::All, "SELECT nope FROM nowhere"),
            ValidationRule::new("fine", RuleStage::All, "SELECT 0"),
        ]);
        let report = engine
            .run(&s, &params("2025-06-01"), RuleStage::All, None)
            .unwrap();

        assert_eq!(report.failed_rules(), vec!["always_one", "stale_races", "broken"]);
        assert!(report.outcomes[2]
            .message
            .as_deref()
            .unwrap()
            .starts_with("predicate error"));
        assert_eq!(s.count_rows("validation_results").unwrap(), 4);
    }

    #[test]
    fn threshold_allows_small_counts() {
        let s = store();
        let mut rule = ValidationRule::new("two", RuleStage::All, "SELECT 2");
        rule.fail_threshold = 2.0;
        let report = ValidationEngine::new(vec![rule])
            .run(&s, &params("2025-06-01"), RuleStage::All, None)
            .unwrap();
        assert!(report.passed());
    }

    #[test]
    fn stage_selects_rules() {
        let s = store();
        let engine = ValidationEngine::new(vec![
            ValidationRule::new("ingest", RuleStage::Ingest, "SELECT 1"),
            ValidationRule::new("preds", RuleStage::Predictions, "SELECT 0"),
            ValidationRule::new("both", RuleStage::All, "SELECT 0"),
        ]);
        let report = engine
            .run(&s, &params("2025-06-01"), RuleStage::Predictions, None)
            .unwrap();
        let names: Vec<_> = report.outcomes.iter().map(|o| o.rule.as_str()).collect();
        assert_eq!(names, vec!["preds", "both"]);
        assert!(report.passed());
    }

    #[test]
    fn builtin_rules_pass_on_empty_store() {
        let s = store();
        let report = ValidationEngine::from_config(&ValidationConfig::default())
            .run(&s, &params("2025-06-01"), RuleStage::All, None)
            .unwrap();
        assert_eq!(report.outcomes.len(), builtin_rules().len());
        assert!(report.passed(), "{:?}", report.failed_rules());
    }
}
