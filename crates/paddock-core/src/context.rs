use crate::config::PipelineConfig;
use crate::model::RunId;
use crate::providers::http::{HttpFetcher, Transport};
use crate::storage::{RaceLocks, Store};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

/// Long-lived handles shared by every run of a process.
#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub config: Arc<PipelineConfig>,
    pub sports: HttpFetcher,
    pub weather: HttpFetcher,
    pub race_locks: RaceLocks,
}

impl Services {
    pub fn new(store: Store, config: PipelineConfig, transport: Arc<dyn Transport>) -> Self {
        let backoff = config.api.retry_policy();
        let sports = HttpFetcher::new(
            transport.clone(),
            config.api.sports_base_url.clone(),
            config.api.sports_api_key.clone(),
            backoff.clone(),
        );
        let weather = HttpFetcher::new(
            transport,
            config.api.weather_base_url.clone(),
            config.api.weather_api_key.clone(),
            backoff,
        );
        Self {
            store,
            config: Arc::new(config),
            sports,
            weather,
            race_locks: RaceLocks::new(),
        }
    }

    pub fn context(&self, run_id: RunId, as_of: NaiveDate, season: Option<i32>) -> SchedulerContext {
        SchedulerContext {
            run_id,
            as_of,
            season,
            store: self.store.clone(),
            config: self.config.clone(),
            sports: self.sports.clone(),
            weather: self.weather.clone(),
            race_locks: self.race_locks.clone(),
        }
    }
}

/// Everything a task handler may touch during one run.
#[derive(Clone)]
pub struct SchedulerContext {
    pub run_id: RunId,
    pub as_of: NaiveDate,
    /// Fixed season for backfills; `None` means "the season of `as_of`" for
    /// calendar ingestion and "any season" elsewhere.
    pub season: Option<i32>,
    pub store: Store,
    pub config: Arc<PipelineConfig>,
    pub sports: HttpFetcher,
    pub weather: HttpFetcher,
    pub race_locks: RaceLocks,
}

impl SchedulerContext {
    pub fn calendar_season(&self) -> i32 {
        self.season.unwrap_or_else(|| self.as_of.year())
    }

    pub fn model_version(&self) -> &str {
        &self.config.predictions.model_version
    }
}
