use chrono::NaiveDate;
use paddock_core::config::PipelineConfig;
use paddock_core::context::Services;
use paddock_core::dag::{task_fn, TaskGraph, TaskHandler, TaskSpec};
use paddock_core::engine::{CancelToken, DagRunner, RunRequest, Trigger};
use paddock_core::errors::TaskError;
use paddock_core::model::{RunStatus, TaskState};
use paddock_core::providers::http::fake::FakeTransport;
use paddock_core::retry::RetryPolicy;
use paddock_core::season::Activation;
use paddock_core::storage::Store;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn june() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn services(parallelism: usize) -> Services {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let mut cfg = PipelineConfig::default();
    cfg.scheduler.parallelism = parallelism;
    cfg.retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
        jitter: 0.0,
    };
    Services::new(store, cfg, Arc::new(FakeTransport::new()))
}

fn counting_ok(counter: &Arc<AtomicU32>) -> Arc<dyn TaskHandler> {
    let c = counter.clone();
    task_fn(move |_ctx| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok("done".to_string())
        }
    })
}

fn failing(counter: &Arc<AtomicU32>, make: fn() -> TaskError) -> Arc<dyn TaskHandler> {
    let c = counter.clone();
    task_fn(move |_ctx| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(make())
        }
    })
}

#[tokio::test]
async fn transient_failure_retries_then_skips_downstream() -> anyhow::Result<()> {
    let svc = services(4);
    let flaky_calls = Arc::new(AtomicU32::new(0));
    let downstream_calls = Arc::new(AtomicU32::new(0));
    let graph = TaskGraph::new(
        "t",
        vec![
            TaskSpec::new(
                "flaky",
                failing(&flaky_calls, || TaskError::transient("upstream 503")),
            ),
            TaskSpec::new("child", counting_ok(&downstream_calls)).after(&["flaky"]),
            TaskSpec::new("grandchild", counting_ok(&downstream_calls)).after(&["child"]),
        ],
    )?;

    let report = DagRunner::new(svc.clone())
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(flaky_calls.load(Ordering::SeqCst), 3);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);

    let flaky = report.task("flaky").unwrap();
    assert_eq!(flaky.state, TaskState::Failed);
    assert_eq!(flaky.attempts, 3);
    assert_eq!(
        report.task("child").unwrap().reason.as_deref(),
        Some("upstream failed: flaky")
    );
    assert_eq!(
        report.task("grandchild").unwrap().reason.as_deref(),
        Some("upstream skipped: child")
    );

    let rows = svc.store.task_runs(report.run_id)?;
    let flaky_states: Vec<TaskState> = rows
        .iter()
        .filter(|r| r.task_name == "flaky")
        .map(|r| r.state)
        .collect();
    assert_eq!(
        flaky_states,
        vec![TaskState::Retrying, TaskState::Retrying, TaskState::Failed]
    );
    let skipped: Vec<_> = rows.iter().filter(|r| r.state == TaskState::Skipped).collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|r| r.attempt == 0 && r.reason.is_some()));
    assert_eq!(svc.store.run_status(report.run_id)?.as_deref(), Some("failed"));
    Ok(())
}

#[tokio::test]
async fn permanent_failure_is_not_retried() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let graph = TaskGraph::new(
        "t",
        vec![TaskSpec::new(
            "bad_payload",
            failing(&calls, || TaskError::permanent("malformed")),
        )],
    )?;
    let report = DagRunner::new(services(1))
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.failed_tasks(), vec!["bad_payload"]);
    Ok(())
}

#[tokio::test]
async fn gated_skip_does_not_fail_or_block() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let graph = TaskGraph::new(
        "t",
        vec![
            TaskSpec::new("summer_only", counting_ok(&calls)).activation(Activation::InSeason),
            TaskSpec::new("always", counting_ok(&calls)).after(&["summer_only"]),
        ],
    )?;
    let winter = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let report = DagRunner::new(services(2))
        .run(&graph, RunRequest::new(Trigger::Cron, winter))
        .await?;

    assert!(report.succeeded());
    let gated = report.task("summer_only").unwrap();
    assert!(gated.gated);
    assert_eq!(gated.reason.as_deref(), Some("gated: off-season"));
    assert_eq!(report.task("always").unwrap().state, TaskState::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn backfill_ignores_the_season_gate() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let graph = TaskGraph::new(
        "t",
        vec![TaskSpec::new("summer_only", counting_ok(&calls)).activation(Activation::InSeason)],
    )?;
    let winter = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let report = DagRunner::new(services(1))
        .run(&graph, RunRequest::backfill(2024, winter))
        .await?;
    assert!(report.succeeded());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fatal_error_aborts_the_run() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let after_calls = Arc::new(AtomicU32::new(0));
    let slow = task_fn(|_ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("slow".to_string())
    });
    let graph = TaskGraph::new(
        "t",
        vec![
            TaskSpec::new(
                "store_gone",
                failing(&calls, || {
                    TaskError::Fatal(anyhow::anyhow!("database disk image is malformed"))
                }),
            ),
            TaskSpec::new("slow", slow),
            TaskSpec::new("independent", counting_ok(&after_calls)).after(&["slow"]),
        ],
    )?;
    let report = DagRunner::new(services(4))
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.task("slow").unwrap().state, TaskState::Succeeded);
    let reason = report.task("independent").unwrap().reason.clone().unwrap();
    assert!(reason.starts_with("aborted:"), "{reason}");
    assert!(!report.succeeded());
    Ok(())
}

#[tokio::test]
async fn cancelled_run_skips_unstarted_tasks() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let graph = TaskGraph::new(
        "t",
        vec![
            TaskSpec::new("a", counting_ok(&calls)),
            TaskSpec::new("b", counting_ok(&calls)).after(&["a"]),
        ],
    )?;
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = DagRunner::new(services(2))
        .with_cancel(cancel)
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    for t in &report.tasks {
        assert_eq!(t.state, TaskState::Skipped);
        assert_eq!(t.reason.as_deref(), Some("cancelled"));
    }
    assert_eq!(report.status, RunStatus::Failed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_transient() -> anyhow::Result<()> {
    let hang = task_fn(|_ctx| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("never".to_string())
    });
    let graph = TaskGraph::new(
        "t",
        vec![TaskSpec::new("hang", hang)
            .timeout(Duration::from_millis(20))
            .retry(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
                jitter: 0.0,
            })],
    )?;
    let report = DagRunner::new(services(1))
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;

    let hang = report.task("hang").unwrap();
    assert_eq!(hang.state, TaskState::Failed);
    assert_eq!(hang.attempts, 2);
    assert!(hang.reason.as_deref().unwrap().contains("timed out"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallelism_is_bounded() -> anyhow::Result<()> {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut specs = Vec::new();
    for i in 0..6 {
        let (live, peak) = (live.clone(), peak.clone());
        let handler = task_fn(move |_ctx| {
            let (live, peak) = (live.clone(), peak.clone());
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(String::new())
            }
        });
        specs.push(TaskSpec::new(format!("t{i}"), handler));
    }
    let graph = TaskGraph::new("wide", specs)?;
    let report = DagRunner::new(services(2))
        .run(&graph, RunRequest::new(Trigger::Manual, june()))
        .await?;

    assert!(report.succeeded());
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    Ok(())
}
