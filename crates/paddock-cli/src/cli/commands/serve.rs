use super::{build_services, exit_codes, today};
use anyhow::Context;
use paddock_core::config::PipelineConfig;
use paddock_core::context::Services;
use paddock_core::dag::TaskGraph;
use paddock_core::engine::{DagRunner, RunRequest, Trigger};
use paddock_core::pipelines::Pipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

/// One cron-driven pipeline. `busy` is set while a run is in flight so an
/// overlapping tick is dropped instead of queued.
struct Schedule {
    pipeline: Pipeline,
    cron: String,
    graph: Arc<TaskGraph>,
    busy: Arc<AtomicBool>,
}

pub async fn run(cfg: PipelineConfig) -> anyhow::Result<i32> {
    let mut schedules = Vec::new();
    for (pipeline, cron) in [
        (Pipeline::Ingestion, &cfg.schedules.ingestion),
        (Pipeline::Predictions, &cfg.schedules.predictions),
        (Pipeline::Maintenance, &cfg.schedules.maintenance),
    ] {
        let graph = match pipeline.graph() {
            Ok(g) => g,
            Err(e) => {
                eprintln!("config error: pipeline '{}': {}", pipeline.as_str(), e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        schedules.push(Schedule {
            pipeline,
            cron: cron.clone(),
            graph: Arc::new(graph),
            busy: Arc::new(AtomicBool::new(false)),
        });
    }

    let services = build_services(cfg)?;
    let mut sched = JobScheduler::new().await.context("creating scheduler")?;
    for s in schedules {
        let cron = s.cron.clone();
        let pipeline = s.pipeline;
        let job = match job_for(s, services.clone()) {
            Ok(job) => job,
            Err(e) => {
                eprintln!(
                    "config error: schedules.{}: '{}': {:#}",
                    pipeline.as_str(),
                    cron,
                    e
                );
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        sched.add(job).await.context("adding scheduler job")?;
        tracing::info!(event = "schedule_registered", pipeline = pipeline.as_str(), cron = %cron);
    }

    sched.start().await.context("starting scheduler")?;
    tracing::info!(event = "serve_started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!(event = "serve_stopping");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(exit_codes::OK)
}

fn job_for(s: Schedule, services: Services) -> anyhow::Result<Job> {
    let Schedule {
        pipeline,
        cron,
        graph,
        busy,
    } = s;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let services = services.clone();
        let graph = graph.clone();
        let busy = busy.clone();
        Box::pin(async move {
            if busy.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    event = "tick_skipped",
                    pipeline = pipeline.as_str(),
                    reason = "previous run still in progress",
                );
                return;
            }
            let req = RunRequest::new(Trigger::Cron, today());
            match DagRunner::new(services).run(&graph, req).await {
                Ok(report) => tracing::info!(
                    event = "scheduled_run_done",
                    pipeline = pipeline.as_str(),
                    run_id = report.run_id,
                    status = report.status.as_str(),
                    failed = ?report.failed_tasks(),
                ),
                Err(e) => tracing::error!(
                    event = "scheduled_run_error",
                    pipeline = pipeline.as_str(),
                    error = %format!("{:#}", e),
                ),
            }
            busy.store(false, Ordering::SeqCst);
        })
    })
    .with_context(|| format!("invalid cron expression '{}'", cron))?;
    Ok(job)
}
