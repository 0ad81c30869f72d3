use super::api::parse_results;
use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::{RaceResult, RaceStatus};
use async_trait::async_trait;

/// Fetches results for every local race that is due but not yet completed.
///
/// Only payloads whose status is `completed` are written; writing results
/// and flipping the race to `completed` happen in one transaction, under the
/// race's advisory lock.
pub struct ResultsIngestor;

#[async_trait]
impl TaskHandler for ResultsIngestor {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let due = ctx
            .store
            .races_awaiting_results(ctx.as_of, ctx.season)
            .map_err(TaskError::store)?;
        let api = &ctx.config.api;

        let (mut completed, mut pending) = (0usize, 0usize);
        for race in due {
            let _guard = ctx.race_locks.acquire(race.id).await;
            // Another writer may have finished this race while we waited.
            match ctx.store.get_race(race.id).map_err(TaskError::store)? {
                Some(r) if r.status == RaceStatus::Scheduled => {}
                _ => continue,
            }

            let body = ctx
                .sports
                .fetch(
                    "results",
                    &[
                        ("season", race.season_year.to_string()),
                        ("round", race.round_number.to_string()),
                    ],
                    api.timeout(),
                    api.max_retries,
                )
                .await?;
            let payload = parse_results(&body)?;

            if RaceStatus::parse(&payload.status) != Some(RaceStatus::Completed)
                || payload.results.is_empty()
            {
                tracing::info!(
                    event = "results_not_final",
                    race_id = race.id,
                    season = race.season_year,
                    round = race.round_number,
                    status = %payload.status,
                );
                pending += 1;
                continue;
            }

            let rows: Vec<RaceResult> = payload
                .results
                .into_iter()
                .map(|r| RaceResult {
                    race_id: race.id,
                    driver_id: r.driver_id,
                    team_id: r.team_id,
                    finishing_position: r.position,
                    points: r.points,
                })
                .collect();
            let wrote = ctx
                .store
                .complete_race(race.id, &rows)
                .map_err(TaskError::store)?;
            if wrote {
                tracing::info!(
                    event = "race_completed",
                    race_id = race.id,
                    season = race.season_year,
                    round = race.round_number,
                    results = rows.len(),
                );
                completed += 1;
            }
        }

        Ok(format!(
            "completed {} race(s), {} awaiting final results",
            completed, pending
        ))
    }
}
