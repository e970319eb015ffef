//! Task DAG construction and execution
//!
//! A [`TaskFlow`] holds tasks and their ordering edges; the [`FlowEngine`]
//! runs them in dependency waves, independent tasks concurrently. Tasks may
//! implement `revert`; on the first failure the engine reverts every
//! completed task in reverse completion order, then reports the failure.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{ParasolError, Result};

/// Errors from flow construction and execution
#[derive(Error, Debug)]
pub enum FlowError {
    /// The task graph contains a dependency cycle
    #[error("Task flow contains a cycle")]
    CyclicFlow,

    /// A task failed; completed tasks were reverted
    #[error("Task '{task}' failed: {message}")]
    TaskFailed {
        /// Name of the failed task
        task: String,
        /// Rendered task error
        message: String,
    },
}

/// One executable unit of a flow.
///
/// `revert` undoes whatever `execute` did; the default is a no-op. Revert
/// runs only for tasks that completed before some other task failed.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable task name, used in logs and failure reports
    fn name(&self) -> &str;

    /// Run the task
    async fn execute(&self) -> Result<()>;

    /// Undo a completed run of the task
    async fn revert(&self) {}
}

/// Handle to a task inside a [`TaskFlow`]
pub type TaskId = NodeIndex;

/// A DAG of tasks with deduplicated ordering edges
#[derive(Default)]
pub struct TaskFlow {
    graph: DiGraph<Arc<dyn Task>, ()>,
    edges: HashSet<(TaskId, TaskId)>,
}

impl TaskFlow {
    /// Create an empty flow
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, returning its id
    pub fn add_task(&mut self, task: Arc<dyn Task>) -> TaskId {
        self.graph.add_node(task)
    }

    /// Order `from` strictly before `to`.
    ///
    /// Adding the same edge twice is a no-op, so linking a shared child into
    /// the same parent from two walk paths stays idempotent.
    pub fn link(&mut self, from: TaskId, to: TaskId) {
        if self.edges.insert((from, to)) {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct ordering edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Wave-parallel executor over a [`TaskFlow`]
#[derive(Default)]
pub struct FlowEngine;

impl FlowEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Run every task of the flow respecting its ordering edges.
    ///
    /// Tasks whose dependencies are all satisfied form a wave and run
    /// concurrently. On the first failed task the engine stops scheduling,
    /// reverts all completed tasks in reverse completion order, and returns
    /// [`FlowError::TaskFailed`].
    pub async fn run(&self, flow: &TaskFlow) -> Result<()> {
        if petgraph::algo::is_cyclic_directed(&flow.graph) {
            return Err(FlowError::CyclicFlow.into());
        }

        let mut indegree: Vec<usize> = flow
            .graph
            .node_indices()
            .map(|idx| flow.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut ready: Vec<TaskId> = flow
            .graph
            .node_indices()
            .filter(|idx| indegree[idx.index()] == 0)
            .collect();
        let mut completed: Vec<TaskId> = Vec::new();

        info!(tasks = flow.task_count(), "flow started");
        while !ready.is_empty() {
            let wave = std::mem::take(&mut ready);
            let results = join_all(wave.iter().map(|&idx| {
                let task = Arc::clone(&flow.graph[idx]);
                async move {
                    debug!(task = task.name(), "task started");
                    let result = task.execute().await;
                    (idx, result)
                }
            }))
            .await;

            let mut failure: Option<(TaskId, ParasolError)> = None;
            for (idx, result) in results {
                match result {
                    Ok(()) => {
                        debug!(task = flow.graph[idx].name(), "task finished");
                        completed.push(idx);
                        for next in flow.graph.neighbors_directed(idx, Direction::Outgoing) {
                            indegree[next.index()] -= 1;
                            if indegree[next.index()] == 0 {
                                ready.push(next);
                            }
                        }
                    }
                    Err(e) => {
                        error!(task = flow.graph[idx].name(), error = %e, "task failed");
                        if failure.is_none() {
                            failure = Some((idx, e));
                        }
                    }
                }
            }

            if let Some((idx, e)) = failure {
                self.revert_completed(flow, &completed).await;
                return Err(FlowError::TaskFailed {
                    task: flow.graph[idx].name().to_string(),
                    message: e.to_string(),
                }
                .into());
            }
        }

        info!(tasks = completed.len(), "flow finished");
        Ok(())
    }

    async fn revert_completed(&self, flow: &TaskFlow, completed: &[TaskId]) {
        for &idx in completed.iter().rev() {
            let task = &flow.graph[idx];
            warn!(task = task.name(), "reverting task");
            task.revert().await;
        }
    }
}
