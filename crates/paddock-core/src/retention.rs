use crate::context::SchedulerContext;
use crate::dag::{TaskHandler, TaskOutput};
use crate::errors::TaskError;
use async_trait::async_trait;
use chrono::Duration;

/// Deletes predictions for races dated more than `retention.days` before the
/// as-of date. Predictions of the configured model for a completed race that
/// has a winner but no accuracy row yet are kept.
pub struct RetentionCleaner;

#[async_trait]
impl TaskHandler for RetentionCleaner {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        let days = ctx.config.retention.days;
        let cutoff = ctx.as_of - Duration::days(i64::from(days));
        let model_version = ctx.model_version();
        let deleted = ctx
            .store
            .purge_predictions_before(cutoff, model_version)
            .map_err(TaskError::store)?;
        let held = ctx
            .store
            .count_predictions_awaiting_accuracy(cutoff, model_version)
            .map_err(TaskError::store)?;

        tracing::info!(
            event = "predictions_purged",
            cutoff = %cutoff,
            deleted,
            held_for_accuracy = held,
        );
        Ok(format!(
            "deleted {} prediction(s) before {}, kept {} awaiting accuracy",
            deleted, cutoff, held
        ))
    }
}
