use super::api::parse_calendar;
use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::{Circuit, RaceStatus, RaceUpsert};
use async_trait::async_trait;

/// Pulls the season calendar and upserts circuits and races by
/// (season, round).
pub struct CalendarIngestor;

#[async_trait]
impl TaskHandler for CalendarIngestor {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let season = ctx.calendar_season();
        let api = &ctx.config.api;
        let body = ctx
            .sports
            .fetch(
                "races",
                &[("season", season.to_string())],
                api.timeout(),
                api.max_retries,
            )
            .await?;
        let payload = parse_calendar(&body)?;

        let mut upserted = 0usize;
        for race in payload.races {
            if race.season != season {
                tracing::warn!(
                    event = "calendar_race_ignored",
                    season,
                    race_season = race.season,
                    round = race.round,
                );
                continue;
            }
            let status = RaceStatus::parse(&race.status).unwrap_or_else(|| {
                tracing::warn!(
                    event = "unknown_race_status",
                    season,
                    round = race.round,
                    status = %race.status,
                );
                RaceStatus::Scheduled
            });

            let c = race.circuit;
            ctx.store
                .upsert_circuit(&Circuit {
                    id: c.id.clone(),
                    name: c.name,
                    locality: c.locality,
                    country: c.country,
                    lat: c.lat,
                    lon: c.lon,
                })
                .map_err(TaskError::store)?;
            ctx.store
                .upsert_race(&RaceUpsert {
                    season_year: race.season,
                    round_number: race.round,
                    name: race.name,
                    date: race.date,
                    circuit_id: c.id,
                    status,
                })
                .map_err(TaskError::store)?;
            upserted += 1;
        }

        tracing::info!(event = "calendar_ingested", season, races = upserted);
        Ok(format!("upserted {} race(s) for {}", upserted, season))
    }
}
