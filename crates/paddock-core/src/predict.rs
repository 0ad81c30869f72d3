use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::{EntityKind, Entry};
use async_trait::async_trait;
use chrono::Utc;
use paddock_metrics::win_probabilities;
use std::collections::HashMap;

/// Percent win probability per driver, in entry order. Drivers without a
/// rating start at `initial_rating`.
pub fn field_probabilities(
    entries: &[Entry],
    ratings: &HashMap<String, f64>,
    initial_rating: f64,
) -> Vec<(String, f64)> {
    let field: Vec<(String, f64)> = entries
        .iter()
        .map(|e| {
            let r = ratings.get(&e.driver_id).copied().unwrap_or(initial_rating);
            (e.driver_id.clone(), r)
        })
        .collect();
    win_probabilities(&field)
}

/// Writes win probabilities for every upcoming race with a known entry list,
/// replacing earlier rows of the configured model version.
pub struct PredictionEngine;

#[async_trait]
impl TaskHandler for PredictionEngine {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let model_version = ctx.model_version().to_string();
        let initial = ctx.config.elo.initial_rating;
        let races = ctx
            .store
            .upcoming_races(ctx.as_of, ctx.season)
            .map_err(TaskError::store)?;
        let ratings = ctx
            .store
            .rating_values(EntityKind::Driver)
            .map_err(TaskError::store)?;

        let (mut predicted, mut skipped) = (0usize, 0usize);
        for race in races {
            let entries = ctx
                .store
                .latest_entry_list(race.season_year, race.round_number)
                .map_err(TaskError::store)?;
            if entries.is_empty() {
                tracing::info!(
                    event = "prediction_skipped",
                    race_id = race.id,
                    reason = "no entry list",
                );
                skipped += 1;
                continue;
            }

            let probs = field_probabilities(&entries, &ratings, initial);
            let _guard = ctx.race_locks.acquire(race.id).await;
            ctx.store
                .replace_predictions(race.id, &model_version, &probs, Utc::now())
                .map_err(TaskError::store)?;
            tracing::info!(
                event = "predictions_written",
                race_id = race.id,
                model_version = %model_version,
                drivers = probs.len(),
            );
            predicted += 1;
        }

        Ok(format!(
            "predicted {} race(s) with {}, {} without entry list",
            predicted, model_version, skipped
        ))
    }
}
