use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::{AccuracyRecord, Prediction, RaceResult};
use async_trait::async_trait;
use chrono::Utc;
use paddock_metrics::{brier_score, log_loss};

/// Brier score and log loss of one race's predictions, or `None` if there is
/// nothing to score or no classified winner.
pub fn score_race(predictions: &[Prediction], results: &[RaceResult]) -> Option<(f64, f64)> {
    let winner = results
        .iter()
        .find(|r| r.finishing_position == Some(1))?
        .driver_id
        .as_str();
    let pairs: Vec<(f64, u8)> = predictions
        .iter()
        .map(|p| (p.win_probability, u8::from(p.driver_id == winner)))
        .collect();
    Some((brier_score(&pairs)?, log_loss(&pairs)?))
}

/// Scores predictions of newly completed races for the configured model.
pub struct AccuracyEvaluator;

#[async_trait]
impl TaskHandler for AccuracyEvaluator {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let model_version = ctx.model_version().to_string();
        let races = ctx
            .store
            .races_pending_accuracy(&model_version)
            .map_err(TaskError::store)?;

        let mut evaluated = 0usize;
        for race in races {
            let predictions = ctx
                .store
                .predictions_for_race(race.id, &model_version)
                .map_err(TaskError::store)?;
            let results = ctx
                .store
                .results_for_race(race.id)
                .map_err(TaskError::store)?;

            let Some((brier, ll)) = score_race(&predictions, &results) else {
                tracing::warn!(
                    event = "accuracy_skipped",
                    race_id = race.id,
                    reason = "no winner in results",
                );
                continue;
            };
            ctx.store
                .insert_accuracy(&AccuracyRecord {
                    race_id: race.id,
                    model_version: model_version.clone(),
                    brier_score: brier,
                    log_loss: ll,
                    sample_size: predictions.len() as u32,
                    evaluated_at: Utc::now(),
                })
                .map_err(TaskError::store)?;
            tracing::info!(
                event = "accuracy_recorded",
                race_id = race.id,
                model_version = %model_version,
                brier_score = brier,
                log_loss = ll,
            );
            evaluated += 1;
        }
        Ok(format!("evaluated {} race(s) for {}", evaluated, model_version))
    }
}
