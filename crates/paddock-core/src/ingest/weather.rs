use super::api::parse_forecast;
use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use crate::model::WeatherObservation;
use async_trait::async_trait;
use chrono::Duration;

/// How far ahead of the as-of date forecasts are pulled.
pub const FORECAST_HORIZON_DAYS: i64 = 7;

pub struct WeatherIngestor;

#[async_trait]
impl TaskHandler for WeatherIngestor {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let horizon = ctx.as_of + Duration::days(FORECAST_HORIZON_DAYS);
        let races = ctx
            .store
            .races_needing_weather(ctx.as_of, horizon, ctx.season)
            .map_err(TaskError::store)?;
        let api = &ctx.config.api;

        let (mut stored, mut skipped) = (0usize, 0usize);
        for race in races {
            let circuit = ctx
                .store
                .get_circuit(&race.circuit_id)
                .map_err(TaskError::store)?;
            let Some((lat, lon)) = circuit.and_then(|c| c.lat.zip(c.lon)) else {
                tracing::info!(
                    event = "weather_skipped",
                    race_id = race.id,
                    circuit = %race.circuit_id,
                    reason = "no coordinates",
                );
                skipped += 1;
                continue;
            };

            let body = ctx
                .weather
                .fetch(
                    "forecast",
                    &[
                        ("lat", lat.to_string()),
                        ("lon", lon.to_string()),
                        ("date", race.date.to_string()),
                    ],
                    api.timeout(),
                    api.max_retries,
                )
                .await?;
            let f = parse_forecast(&body)?;
            ctx.store
                .upsert_weather(&WeatherObservation {
                    race_id: race.id,
                    observed_for: f.date.unwrap_or(race.date),
                    temperature_c: f.temperature_c,
                    precipitation_mm: f.precipitation_mm,
                    wind_kph: f.wind_kph,
                    humidity_pct: f.humidity_pct,
                })
                .map_err(TaskError::store)?;
            stored += 1;
        }

        Ok(format!(
            "stored weather for {} race(s), {} without coordinates",
            stored, skipped
        ))
    }
}
