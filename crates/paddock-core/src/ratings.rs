use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::{EntityKind, RaceResult};
use crate::storage::store::RatingKey;
use async_trait::async_trait;
use paddock_metrics::elo::{apply_deltas, best_by_group, race_deltas};
use paddock_metrics::{EloParams, Standing};
use std::collections::HashMap;

/// New driver and team ratings after one race, computed from pre-race
/// ratings. Teams are compared through their best-placed driver.
pub fn rating_updates(
    results: &[RaceResult],
    current: &HashMap<RatingKey, f64>,
    params: &EloParams,
) -> Vec<(RatingKey, f64)> {
    let mut out = Vec::new();

    let drivers: Vec<Standing> = results
        .iter()
        .map(|r| Standing::new(r.driver_id.as_str(), r.finishing_position))
        .collect();
    let teams = best_by_group(
        results
            .iter()
            .map(|r| (r.team_id.as_str(), r.finishing_position)),
    );

    for (kind, standings) in [(EntityKind::Driver, drivers), (EntityKind::Team, teams)] {
        let before: HashMap<String, f64> = current
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), v)| (id.clone(), *v))
            .collect();
        let deltas = race_deltas(&standings, &before, params);
        for (id, value) in apply_deltas(&before, &deltas, params) {
            out.push(((kind, id), value));
        }
    }
    out
}

/// Applies Elo updates for completed races that have not been rated yet,
/// oldest first. Each race is rated at most once.
pub struct EloRatingEngine;

#[async_trait]
impl TaskHandler for EloRatingEngine {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let params = ctx.config.elo;
        let pending = ctx
            .store
            .races_pending_ratings()
            .map_err(TaskError::store)?;

        let mut applied = 0usize;
        for race in pending {
            let _guard = ctx.race_locks.acquire(race.id).await;
            let wrote = ctx
                .store
                .apply_race_ratings(race.id, |results, current| {
                    rating_updates(results, current, &params)
                })
                .map_err(TaskError::store)?;
            if wrote {
                tracing::info!(
                    event = "ratings_applied",
                    race_id = race.id,
                    season = race.season_year,
                    round = race.round_number,
                );
                applied += 1;
            } else {
                tracing::debug!(event = "ratings_already_applied", race_id = race.id);
            }
        }
        Ok(format!("applied ratings for {} race(s)", applied))
    }
}
