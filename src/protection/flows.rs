//! Operation flow assembly
//!
//! Builds the ready-to-run task flow for each operation kind. Protect and
//! delete flows fence the resource tasks between an initiate task and a
//! completing task; the initiate tasks are revert-capable, so a failed flow
//! leaves the checkpoint in `error` / `error-deleting` instead of a
//! transient status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::error;

use super::flow_builder::{build_resource_flow, HookSet};
use super::{OperationKind, ProtectionRegistry};
use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::flow::{Task, TaskFlow, TaskId};
use crate::resource::{Context, GraphNode};
use crate::Result;

async fn transition(
    checkpoint: &Arc<Mutex<Checkpoint>>,
    status: CheckpointStatus,
) -> Result<()> {
    let mut cp = checkpoint.lock().await;
    cp.set_status(status);
    cp.commit().await?;
    Ok(())
}

/// Marks status while reverting to an error state; commit failures during
/// revert are logged, the flow is already failing.
async fn revert_transition(checkpoint: &Arc<Mutex<Checkpoint>>, status: CheckpointStatus) {
    let mut cp = checkpoint.lock().await;
    cp.set_status(status);
    cp.set_extra_info("finished_at", json!(Utc::now().to_rfc3339()));
    if let Err(e) = cp.commit().await {
        error!(checkpoint_id = %cp.id(), error = %e, "failed to record error status");
    }
}

struct InitiateProtectTask {
    checkpoint: Arc<Mutex<Checkpoint>>,
}

#[async_trait]
impl Task for InitiateProtectTask {
    fn name(&self) -> &str {
        "initiate_protect"
    }

    async fn execute(&self) -> Result<()> {
        transition(&self.checkpoint, CheckpointStatus::Protecting).await
    }

    async fn revert(&self) {
        revert_transition(&self.checkpoint, CheckpointStatus::Error).await;
    }
}

struct CompleteProtectTask {
    checkpoint: Arc<Mutex<Checkpoint>>,
}

#[async_trait]
impl Task for CompleteProtectTask {
    fn name(&self) -> &str {
        "complete_protect"
    }

    async fn execute(&self) -> Result<()> {
        transition(&self.checkpoint, CheckpointStatus::Available).await
    }
}

struct InitiateDeleteTask {
    checkpoint: Arc<Mutex<Checkpoint>>,
}

#[async_trait]
impl Task for InitiateDeleteTask {
    fn name(&self) -> &str {
        "initiate_delete"
    }

    async fn execute(&self) -> Result<()> {
        transition(&self.checkpoint, CheckpointStatus::Deleting).await
    }

    async fn revert(&self) {
        revert_transition(&self.checkpoint, CheckpointStatus::ErrorDeleting).await;
    }
}

struct CompleteDeleteTask {
    checkpoint: Arc<Mutex<Checkpoint>>,
}

#[async_trait]
impl Task for CompleteDeleteTask {
    fn name(&self) -> &str {
        "complete_delete"
    }

    async fn execute(&self) -> Result<()> {
        self.checkpoint.lock().await.delete().await?;
        Ok(())
    }
}

fn fence(flow: &mut TaskFlow, initiate: TaskId, complete: TaskId, roots: &[HookSet]) {
    if roots.is_empty() {
        flow.link(initiate, complete);
        return;
    }
    for hook_set in roots {
        flow.link(initiate, hook_set.prepare_begin);
        flow.link(hook_set.complete, complete);
    }
}

/// Build the protect flow for a resource graph.
///
/// `initiate_protect` precedes every root's `prepare_begin`; every root's
/// `complete` precedes `complete_protect`, which marks the checkpoint
/// `available`.
pub fn build_protect_flow(
    registry: &ProtectionRegistry,
    source_nodes: &[Arc<GraphNode>],
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &Value,
) -> Result<TaskFlow> {
    let mut flow = TaskFlow::new();
    let initiate = flow.add_task(Arc::new(InitiateProtectTask {
        checkpoint: Arc::clone(&checkpoint),
    }));
    let roots = build_resource_flow(
        OperationKind::Protect,
        &mut flow,
        registry,
        source_nodes,
        Arc::clone(&checkpoint),
        context,
        parameters,
        &Map::new(),
    )?;
    let complete = flow.add_task(Arc::new(CompleteProtectTask { checkpoint }));
    fence(&mut flow, initiate, complete, &roots);
    Ok(flow)
}

/// Build the restore flow; `extras` carries the restore target (e.g. a
/// `restore` record or `heat_template` for the orchestration-based path).
pub fn build_restore_flow(
    registry: &ProtectionRegistry,
    source_nodes: &[Arc<GraphNode>],
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &Value,
    extras: &Map<String, Value>,
) -> Result<TaskFlow> {
    let mut flow = TaskFlow::new();
    build_resource_flow(
        OperationKind::Restore,
        &mut flow,
        registry,
        source_nodes,
        checkpoint,
        context,
        parameters,
        extras,
    )?;
    Ok(flow)
}

/// Build the delete flow: `initiate_delete` (revert → `error-deleting`)
/// fences the resource tasks, and `complete_delete` marks the checkpoint
/// deleted and drops its index entries.
pub fn build_delete_flow(
    registry: &ProtectionRegistry,
    source_nodes: &[Arc<GraphNode>],
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &Value,
) -> Result<TaskFlow> {
    let mut flow = TaskFlow::new();
    let initiate = flow.add_task(Arc::new(InitiateDeleteTask {
        checkpoint: Arc::clone(&checkpoint),
    }));
    let roots = build_resource_flow(
        OperationKind::Delete,
        &mut flow,
        registry,
        source_nodes,
        Arc::clone(&checkpoint),
        context,
        parameters,
        &Map::new(),
    )?;
    let complete = flow.add_task(Arc::new(CompleteDeleteTask { checkpoint }));
    fence(&mut flow, initiate, complete, &roots);
    Ok(flow)
}

/// Build the verify flow: resource tasks only, no status fencing
pub fn build_verify_flow(
    registry: &ProtectionRegistry,
    source_nodes: &[Arc<GraphNode>],
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &Value,
    extras: &Map<String, Value>,
) -> Result<TaskFlow> {
    let mut flow = TaskFlow::new();
    build_resource_flow(
        OperationKind::Verify,
        &mut flow,
        registry,
        source_nodes,
        checkpoint,
        context,
        parameters,
        extras,
    )?;
    Ok(flow)
}
