//! The named pipelines the CLI and the cron daemon run.

use crate::accuracy::AccuracyEvaluator;
use crate::config::RuleStage;
use crate::dag::{GraphError, TaskGraph, TaskSpec};
use crate::ingest::{CalendarIngestor, ResultsIngestor, WeatherIngestor};
use crate::predict::PredictionEngine;
use crate::ratings::EloRatingEngine;
use crate::retention::RetentionCleaner;
use crate::season::Activation;
use crate::validate::ValidationTask;
use std::sync::Arc;

pub const INGEST_CALENDAR: &str = "ingest_calendar";
pub const INGEST_RESULTS: &str = "ingest_results";
pub const INGEST_WEATHER: &str = "ingest_weather";
pub const VALIDATE_INGEST: &str = "validate_ingest";
pub const UPDATE_RATINGS: &str = "update_ratings";
pub const GENERATE_PREDICTIONS: &str = "generate_predictions";
pub const VALIDATE_PREDICTIONS: &str = "validate_predictions";
pub const EVALUATE_ACCURACY: &str = "evaluate_accuracy";
pub const PURGE_PREDICTIONS: &str = "purge_predictions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Ingestion,
    Predictions,
    Maintenance,
    Backfill,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Ingestion => "ingestion",
            Pipeline::Predictions => "predictions",
            Pipeline::Maintenance => "maintenance",
            Pipeline::Backfill => "backfill",
        }
    }

    pub fn graph(&self) -> Result<TaskGraph, GraphError> {
        match self {
            Pipeline::Ingestion => ingestion(),
            Pipeline::Predictions => predictions(),
            Pipeline::Maintenance => maintenance(),
            Pipeline::Backfill => backfill(),
        }
    }
}

/// calendar → {results, weather} → validate → ratings → predictions → validate
pub fn ingestion() -> Result<TaskGraph, GraphError> {
    TaskGraph::new(
        Pipeline::Ingestion.as_str(),
        vec![
            TaskSpec::new(INGEST_CALENDAR, Arc::new(CalendarIngestor)),
            TaskSpec::new(INGEST_RESULTS, Arc::new(ResultsIngestor))
                .after(&[INGEST_CALENDAR])
                .activation(Activation::InSeason),
            TaskSpec::new(INGEST_WEATHER, Arc::new(WeatherIngestor))
                .after(&[INGEST_CALENDAR])
                .activation(Activation::InSeason),
            TaskSpec::new(
                VALIDATE_INGEST,
                Arc::new(ValidationTask {
                    stage: RuleStage::Ingest,
                }),
            )
            .after(&[INGEST_RESULTS, INGEST_WEATHER]),
            TaskSpec::new(UPDATE_RATINGS, Arc::new(EloRatingEngine)).after(&[VALIDATE_INGEST]),
            TaskSpec::new(GENERATE_PREDICTIONS, Arc::new(PredictionEngine))
                .after(&[UPDATE_RATINGS])
                .activation(Activation::InSeason),
            TaskSpec::new(
                VALIDATE_PREDICTIONS,
                Arc::new(ValidationTask {
                    stage: RuleStage::Predictions,
                }),
            )
            .after(&[GENERATE_PREDICTIONS]),
        ],
    )
}

pub fn predictions() -> Result<TaskGraph, GraphError> {
    TaskGraph::new(
        Pipeline::Predictions.as_str(),
        vec![
            TaskSpec::new(GENERATE_PREDICTIONS, Arc::new(PredictionEngine))
                .activation(Activation::InSeason),
            TaskSpec::new(
                VALIDATE_PREDICTIONS,
                Arc::new(ValidationTask {
                    stage: RuleStage::Predictions,
                }),
            )
            .after(&[GENERATE_PREDICTIONS]),
        ],
    )
}

pub fn maintenance() -> Result<TaskGraph, GraphError> {
    TaskGraph::new(
        Pipeline::Maintenance.as_str(),
        vec![
            TaskSpec::new(EVALUATE_ACCURACY, Arc::new(AccuracyEvaluator)),
            TaskSpec::new(PURGE_PREDICTIONS, Arc::new(RetentionCleaner))
                .after(&[EVALUATE_ACCURACY]),
        ],
    )
}

/// Re-ingests one season end to end; run with a disabled season gate.
pub fn backfill() -> Result<TaskGraph, GraphError> {
    TaskGraph::new(
        Pipeline::Backfill.as_str(),
        vec![
            TaskSpec::new(INGEST_CALENDAR, Arc::new(CalendarIngestor)),
            TaskSpec::new(INGEST_RESULTS, Arc::new(ResultsIngestor)).after(&[INGEST_CALENDAR]),
            TaskSpec::new(INGEST_WEATHER, Arc::new(WeatherIngestor)).after(&[INGEST_RESULTS]),
            TaskSpec::new(
                VALIDATE_INGEST,
                Arc::new(ValidationTask {
                    stage: RuleStage::Ingest,
                }),
            )
            .after(&[INGEST_WEATHER]),
            TaskSpec::new(UPDATE_RATINGS, Arc::new(EloRatingEngine)).after(&[VALIDATE_INGEST]),
        ],
    )
}
