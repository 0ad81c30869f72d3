use crate::context::{SchedulerContext, Services};
use crate::dag::{TaskGraph, TaskOutput};
use crate::errors::{ErrorClass, TaskError};
use crate::fingerprint::config_fingerprint;
use crate::model::{RunId, RunStatus, TaskState};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::season::{SeasonGate, SeasonPhase, TaskGate};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Cron,
    Backfill,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Cron => "cron",
            Trigger::Backfill => "backfill",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub trigger: Trigger,
    pub as_of: NaiveDate,
    pub season: Option<i32>,
    pub gate: SeasonGate,
}

impl RunRequest {
    /// Gated by the season phase of `as_of`.
    pub fn new(trigger: Trigger, as_of: NaiveDate) -> Self {
        Self {
            trigger,
            as_of,
            season: None,
            gate: SeasonGate::AsOf(as_of),
        }
    }

    /// Fixed season, never gated.
    pub fn backfill(season: i32, as_of: NaiveDate) -> Self {
        Self {
            trigger: Trigger::Backfill,
            as_of,
            season: Some(season),
            gate: SeasonGate::Disabled,
        }
    }
}

/// Run-level cancellation flag, checked before each task start.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub state: TaskState,
    pub attempts: u32,
    /// Skip reason or final error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub gated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub trigger: Trigger,
    pub as_of: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SeasonPhase>,
    pub status: RunStatus,
    pub tasks: Vec<TaskReport>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed)
            .map(|t| t.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Pending,
    Running,
    Succeeded(TaskOutput),
    Failed { class: ErrorClass, error: String },
    Skipped { reason: String, gated: bool },
}

impl Node {
    fn is_terminal(&self) -> bool {
        !matches!(self, Node::Pending | Node::Running)
    }
}

struct Slot {
    node: Node,
    attempts: u32,
    /// `task_runs` row of the attempt in flight.
    row: Option<i64>,
}

enum Event {
    AttemptStarted {
        task: usize,
        attempt: u32,
    },
    AttemptFailed {
        task: usize,
        attempt: u32,
        error: String,
        retry_in: Option<Duration>,
    },
    Finished {
        task: usize,
        result: Result<TaskOutput, TaskError>,
    },
}

/// Executes one [`TaskGraph`] run.
///
/// The coordinator loop in [`DagRunner::run`] owns every task's state and is
/// the only writer of `task_runs`. Handlers run in spawned workers that
/// report back over a channel; a semaphore caps how many run at once.
pub struct DagRunner {
    services: Services,
    parallelism: usize,
    default_retry: RetryPolicy,
    task_timeout: Duration,
    cancel: CancelToken,
}

impl DagRunner {
    pub fn new(services: Services) -> Self {
        let cfg = services.config.clone();
        Self {
            services,
            parallelism: cfg.scheduler.parallelism.max(1),
            default_retry: cfg.retry.clone(),
            task_timeout: cfg.scheduler.task_timeout(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run(&self, graph: &TaskGraph, req: RunRequest) -> anyhow::Result<RunReport> {
        let started = Instant::now();
        let store = &self.services.store;
        let fingerprint = config_fingerprint(&self.services.config);
        let run_id = store.create_run(
            graph.name(),
            req.trigger.as_str(),
            req.as_of,
            Some(&fingerprint),
        )?;
        let ctx = self.services.context(run_id, req.as_of, req.season);
        let phase = req.gate.phase();

        tracing::info!(
            event = "run_started",
            run_id,
            pipeline = %graph.name(),
            trigger = req.trigger.as_str(),
            as_of = %req.as_of,
            phase = phase.map(|p| p.as_str()).unwrap_or("ungated"),
        );

        let mut slots: Vec<Slot> = graph
            .tasks()
            .iter()
            .map(|_| Slot {
                node: Node::Pending,
                attempts: 0,
                row: None,
            })
            .collect();

        for (i, spec) in graph.tasks().iter().enumerate() {
            if let TaskGate::GatedSkip(reason) = req.gate.gate(spec.activation) {
                self.skip(run_id, graph, &mut slots, i, reason, true);
            }
        }

        let sem = Arc::new(Semaphore::new(self.parallelism));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut running = 0usize;
        let mut abort: Option<String> = None;

        loop {
            for i in 0..slots.len() {
                if !matches!(slots[i].node, Node::Pending) {
                    continue;
                }
                if let Some(why) = &abort {
                    let reason = format!("aborted: {}", why);
                    self.skip(run_id, graph, &mut slots, i, reason, false);
                    continue;
                }
                if self.cancel.is_cancelled() {
                    self.skip(run_id, graph, &mut slots, i, "cancelled".into(), false);
                    continue;
                }

                let mut ready = true;
                let mut blocked: Option<String> = None;
                for d in graph.dependencies(i) {
                    match &slots[d].node {
                        Node::Pending | Node::Running => ready = false,
                        Node::Failed { .. } => {
                            blocked.get_or_insert_with(|| {
                                format!("upstream failed: {}", graph.tasks()[d].name)
                            });
                        }
                        Node::Skipped { gated: false, .. } => {
                            blocked.get_or_insert_with(|| {
                                format!("upstream skipped: {}", graph.tasks()[d].name)
                            });
                        }
                        Node::Skipped { gated: true, .. } | Node::Succeeded(_) => {}
                    }
                }
                if !ready {
                    continue;
                }
                if let Some(reason) = blocked {
                    self.skip(run_id, graph, &mut slots, i, reason, false);
                    continue;
                }

                let Ok(permit) = sem.clone().try_acquire_owned() else {
                    continue;
                };
                if let Err(e) = store.ping() {
                    drop(permit);
                    let why = format!("{:#}", e);
                    tracing::error!(event = "store_unreachable", run_id, error = %why);
                    self.skip(run_id, graph, &mut slots, i, format!("aborted: {}", why), false);
                    abort = Some(why);
                    continue;
                }

                slots[i].node = Node::Running;
                running += 1;
                self.spawn_task(graph, i, ctx.clone(), tx.clone(), permit);
            }

            if running == 0 {
                break;
            }
            let Some(event) = rx.recv().await else {
                break;
            };
            match event {
                Event::AttemptStarted { task, attempt } => {
                    slots[task].attempts = attempt;
                    slots[task].row = audit(
                        store.start_task_attempt(run_id, &graph.tasks()[task].name, attempt),
                    );
                    tracing::info!(
                        event = "task_started",
                        run_id,
                        task = %graph.tasks()[task].name,
                        attempt,
                    );
                }
                Event::AttemptFailed {
                    task,
                    attempt,
                    error,
                    retry_in,
                } => {
                    let name = &graph.tasks()[task].name;
                    let state = if retry_in.is_some() {
                        TaskState::Retrying
                    } else {
                        TaskState::Failed
                    };
                    if let Some(row) = slots[task].row.take() {
                        audit(store.finish_task_attempt(row, state, Some(&error)));
                    }
                    match retry_in {
                        Some(delay) => tracing::warn!(
                            event = "task_retrying",
                            run_id,
                            task = %name,
                            attempt,
                            error = %error,
                            retry_in_ms = delay.as_millis() as u64,
                        ),
                        None => tracing::error!(
                            event = "task_failed",
                            run_id,
                            task = %name,
                            attempt,
                            error = %error,
                        ),
                    }
                }
                Event::Finished { task, result } => {
                    running -= 1;
                    slots[task].node = match result {
                        Ok(output) => {
                            if let Some(row) = slots[task].row.take() {
                                audit(store.finish_task_attempt(row, TaskState::Succeeded, None));
                            }
                            tracing::info!(
                                event = "task_succeeded",
                                run_id,
                                task = %graph.tasks()[task].name,
                                attempts = slots[task].attempts,
                                output = %output,
                            );
                            Node::Succeeded(output)
                        }
                        Err(err) => {
                            if let Some(row) = slots[task].row.take() {
                                let msg = err.to_string();
                                audit(store.finish_task_attempt(row, TaskState::Failed, Some(&msg)));
                            }
                            if err.class() == ErrorClass::Fatal && abort.is_none() {
                                abort = Some(format!("{} failed fatally", graph.tasks()[task].name));
                            }
                            Node::Failed {
                                class: err.class(),
                                error: err.to_string(),
                            }
                        }
                    };
                }
            }
        }

        for i in 0..slots.len() {
            if !slots[i].node.is_terminal() {
                self.skip(run_id, graph, &mut slots, i, "not started".into(), false);
            }
        }

        let ok = slots.iter().all(|s| {
            matches!(
                s.node,
                Node::Succeeded(_) | Node::Skipped { gated: true, .. }
            )
        });
        let status = if ok {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        if let Err(e) = store.finalize_run(run_id, status) {
            tracing::error!(event = "run_finalize_failed", run_id, error = %format!("{:#}", e));
        }

        let tasks = graph
            .tasks()
            .iter()
            .zip(slots)
            .map(|(spec, slot)| to_report(&spec.name, slot))
            .collect();
        let report = RunReport {
            run_id,
            pipeline: graph.name().to_string(),
            trigger: req.trigger,
            as_of: req.as_of,
            phase,
            status,
            tasks,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            event = "run_finished",
            run_id,
            pipeline = %report.pipeline,
            status = status.as_str(),
            duration_ms = report.duration_ms,
        );
        Ok(report)
    }

    fn skip(
        &self,
        run_id: RunId,
        graph: &TaskGraph,
        slots: &mut [Slot],
        i: usize,
        reason: String,
        gated: bool,
    ) {
        let name = &graph.tasks()[i].name;
        audit(
            self.services
                .store
                .record_skipped_task(run_id, name, &reason),
        );
        tracing::info!(event = "task_skipped", run_id, task = %name, reason = %reason);
        slots[i].node = Node::Skipped { reason, gated };
    }

    fn spawn_task(
        &self,
        graph: &TaskGraph,
        i: usize,
        ctx: SchedulerContext,
        tx: mpsc::UnboundedSender<Event>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let spec = &graph.tasks()[i];
        let handler = spec.handler.clone();
        let policy = spec.retry.clone().unwrap_or_else(|| self.default_retry.clone());
        let limit = spec.timeout.unwrap_or(self.task_timeout);

        let work = {
            let tx = tx.clone();
            async move {
                let out = with_retry(
                    &policy,
                    |attempt| {
                        let _ = tx.send(Event::AttemptStarted { task: i, attempt });
                        let handler = handler.clone();
                        let ctx = ctx.clone();
                        async move {
                            match tokio::time::timeout(limit, handler.run(&ctx)).await {
                                Ok(result) => result,
                                Err(_) => Err(TaskError::transient(format!(
                                    "timed out after {}s",
                                    limit.as_secs_f64()
                                ))),
                            }
                        }
                    },
                    TaskError::is_retryable,
                    |attempt, err, retry_in| {
                        let _ = tx.send(Event::AttemptFailed {
                            task: i,
                            attempt,
                            error: err.to_string(),
                            retry_in,
                        });
                    },
                )
                .await;
                out.map_err(|e| match e {
                    RetryError::Exhausted { last, .. } => last,
                    RetryError::Aborted { error, .. } => error,
                })
            }
        };

        tokio::spawn(async move {
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(join) => Err(TaskError::permanent(format!("task panicked: {}", join))),
            };
            // Free the slot before the coordinator hears about it.
            drop(permit);
            let _ = tx.send(Event::Finished { task: i, result });
        });
    }
}

fn audit<T>(res: anyhow::Result<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(event = "audit_write_failed", error = %format!("{:#}", e));
            None
        }
    }
}

fn to_report(name: &str, slot: Slot) -> TaskReport {
    let (state, reason, output, error_class, gated) = match slot.node {
        Node::Succeeded(out) => (TaskState::Succeeded, None, Some(out), None, false),
        Node::Failed { class, error } => (TaskState::Failed, Some(error), None, Some(class), false),
        Node::Skipped { reason, gated } => (TaskState::Skipped, Some(reason), None, None, gated),
        Node::Pending => (TaskState::Pending, None, None, None, false),
        Node::Running => (TaskState::Running, None, None, None, false),
    };
    TaskReport {
        name: name.to_string(),
        state,
        attempts: slot.attempts,
        reason,
        output,
        error_class,
        gated,
    }
}
