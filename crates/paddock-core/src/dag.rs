//! Statically declared task graphs.
//!
//! A [`TaskGraph`] is a set of named tasks plus "must succeed before" edges.
//! It is validated once at construction: every dependency must name a task
//! in the graph, names must be unique, and the graph must be acyclic.

use crate::context::SchedulerContext;
use crate::errors::TaskError;
use crate::retry::RetryPolicy;
use crate::season::Activation;
use async_trait::async_trait;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Short human-readable summary of what a task did.
pub type TaskOutput = String;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnTask<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(SchedulerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: &SchedulerContext) -> Result<TaskOutput, TaskError> {
        (self.0)(ctx.clone()).await
    }
}

pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(SchedulerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

#[derive(Clone)]
pub struct TaskSpec {
    pub name: String,
    pub deps: Vec<String>,
    pub handler: Arc<dyn TaskHandler>,
    pub activation: Activation,
    /// Overrides the runner's default policy.
    pub retry: Option<RetryPolicy>,
    /// Overrides the runner's default per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            handler,
            activation: Activation::Always,
            retry: None,
            timeout: None,
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.deps.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("activation", &self.activation)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("duplicate task '{0}'")]
    DuplicateTask(String),
    #[error("dependency cycle through task '{0}'")]
    Cycle(String),
}

/// A validated, acyclic task graph. Tasks are stored in topological order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    tasks: Vec<TaskSpec>,
    index: HashMap<String, usize>,
    /// `dependents[i]` lists the tasks that declared task `i` as a dependency.
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>, specs: Vec<TaskSpec>) -> Result<Self, GraphError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if nodes.contains_key(&spec.name) {
                return Err(GraphError::DuplicateTask(spec.name.clone()));
            }
            nodes.insert(spec.name.clone(), graph.add_node(i));
        }
        for spec in &specs {
            let to = nodes[&spec.name];
            for dep in &spec.deps {
                let from = nodes
                    .get(dep)
                    .ok_or_else(|| GraphError::UnknownDependency {
                        task: spec.name.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.update_edge(*from, to, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(specs[graph[cycle.node_id()]].name.clone()))?;

        // Node weights index the declaration order; re-key them by name.
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let mut slots: Vec<Option<TaskSpec>> = specs.into_iter().map(Some).collect();
        let tasks: Vec<TaskSpec> = order
            .iter()
            .filter_map(|node| slots[graph[*node]].take())
            .collect();
        let index: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        let mut dependents = vec![Vec::new(); tasks.len()];
        for node in &order {
            let from = index[&names[graph[*node]]];
            let mut next: Vec<usize> = graph
                .neighbors_directed(*node, Direction::Outgoing)
                .map(|n| index[&names[graph[n]]])
                .collect();
            next.sort_unstable();
            dependents[from] = next;
        }

        Ok(Self {
            name: name.into(),
            tasks,
            index,
            dependents,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks in a valid execution order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.position(name).map(|i| &self.tasks[i])
    }

    pub fn dependencies(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.tasks[i].deps.iter().filter_map(|d| self.position(d))
    }

    pub fn dependents(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    /// All transitive dependents of `name`, in execution order.
    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        let Some(start) = self.position(name) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents[start].iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if seen.insert(i) {
                queue.extend(self.dependents[i].iter().copied());
            }
        }
        seen.into_iter().map(|i| self.tasks[i].name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn TaskHandler> {
        task_fn(|_ctx| async { Ok(String::new()) })
    }

    fn spec(name: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec::new(name, noop()).after(deps)
    }

    #[test]
    fn orders_tasks_topologically() {
        let g = TaskGraph::new(
            "t",
            vec![
                spec("predict", &["ratings"]),
                spec("ratings", &["results", "weather"]),
                spec("weather", &["calendar"]),
                spec("results", &["calendar"]),
                spec("calendar", &[]),
            ],
        )
        .unwrap();

        let pos = |n: &str| g.position(n).unwrap();
        assert_eq!(pos("calendar"), 0);
        assert!(pos("results") < pos("ratings"));
        assert!(pos("weather") < pos("ratings"));
        assert_eq!(pos("predict"), 4);
        assert_eq!(g.downstream_of("results"), vec!["ratings", "predict"]);
        assert_eq!(g.downstream_of("calendar").len(), 4);
        assert!(g.downstream_of("predict").is_empty());
    }

    #[test]
    fn rejects_cycles() {
        let err = TaskGraph::new(
            "t",
            vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_unknown_and_duplicate_tasks() {
        let err = TaskGraph::new("t", vec![spec("a", &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "a".into(),
                dependency: "ghost".into()
            }
        );

        let err = TaskGraph::new("t", vec![spec("a", &[]), spec("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("a".into()));
    }
}
