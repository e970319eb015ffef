//! Resource flow construction
//!
//! Walks a resource dependency graph and emits the task DAG for one
//! operation kind: four lifecycle hook-tasks per distinct resource, chained
//! `prepare_begin → prepare_finish → main → complete`, with cross-resource
//! links so a parent begins before its children and completes after them.
//! A resource shared by several parents gets exactly one hook-set, re-linked
//! into each parent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{HookContext, Operation, OperationKind, ProtectionRegistry};
use crate::checkpoint::Checkpoint;
use crate::flow::{Task, TaskFlow, TaskId};
use crate::resource::{walk_graph, Context, GraphNode, GraphWalkerListener, Resource};
use crate::Result;

/// The four task ids making up one resource's lifecycle chain
#[derive(Debug, Clone, Copy)]
pub struct HookSet {
    /// `on_prepare_begin` task
    pub prepare_begin: TaskId,
    /// `on_prepare_finish` task
    pub prepare_finish: TaskId,
    /// `on_main` task
    pub main: TaskId,
    /// `on_complete` task
    pub complete: TaskId,
}

#[derive(Debug, Clone, Copy)]
enum HookPhase {
    PrepareBegin,
    PrepareFinish,
    Main,
    Complete,
}

impl HookPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::PrepareBegin => "prepare_begin",
            Self::PrepareFinish => "prepare_finish",
            Self::Main => "main",
            Self::Complete => "complete",
        }
    }
}

struct HookTask {
    name: String,
    phase: HookPhase,
    operation: Arc<dyn Operation>,
    hook_ctx: Arc<HookContext>,
}

#[async_trait]
impl Task for HookTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<()> {
        match self.phase {
            HookPhase::PrepareBegin => self.operation.on_prepare_begin(&self.hook_ctx).await,
            HookPhase::PrepareFinish => self.operation.on_prepare_finish(&self.hook_ctx).await,
            HookPhase::Main => self.operation.on_main(&self.hook_ctx).await,
            HookPhase::Complete => self.operation.on_complete(&self.hook_ctx).await,
        }
    }
}

/// Merge the per-type parameters with the per-`type#id` overlay
fn overlay_parameters(parameters: &Value, resource: &Resource) -> Value {
    let mut merged = Map::new();
    for key in [resource.resource_type().to_string(), resource.key()] {
        if let Some(Value::Object(layer)) = parameters.get(&key) {
            for (k, v) in layer {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

struct FlowBuilderListener<'a> {
    kind: OperationKind,
    flow: &'a mut TaskFlow,
    registry: &'a ProtectionRegistry,
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &'a Value,
    extras: &'a Map<String, Value>,
    stack: Vec<HookSet>,
    built: HashMap<*const GraphNode, HookSet>,
    roots: Vec<HookSet>,
}

impl FlowBuilderListener<'_> {
    fn build_hook_set(&mut self, resource: &Resource) -> Result<HookSet> {
        let plugin = self.registry.get(resource.resource_type())?;
        let operation = match self.kind {
            OperationKind::Protect => plugin.get_protect_operation(resource),
            OperationKind::Restore => plugin.get_restore_operation(resource),
            OperationKind::Delete => plugin.get_delete_operation(resource),
            OperationKind::Verify => plugin.get_verify_operation(resource),
        };

        let hook_ctx = Arc::new(HookContext {
            checkpoint: Arc::clone(&self.checkpoint),
            resource: resource.clone(),
            context: self.context.clone(),
            parameters: overlay_parameters(self.parameters, resource),
            extras: self.extras.clone(),
        });

        let mut add = |phase: HookPhase| {
            self.flow.add_task(Arc::new(HookTask {
                name: format!("{}_{}_{}", self.kind, phase.as_str(), resource.key()),
                phase,
                operation: Arc::clone(&operation),
                hook_ctx: Arc::clone(&hook_ctx),
            }))
        };

        let hook_set = HookSet {
            prepare_begin: add(HookPhase::PrepareBegin),
            prepare_finish: add(HookPhase::PrepareFinish),
            main: add(HookPhase::Main),
            complete: add(HookPhase::Complete),
        };

        self.flow.link(hook_set.prepare_begin, hook_set.prepare_finish);
        self.flow.link(hook_set.prepare_finish, hook_set.main);
        self.flow.link(hook_set.main, hook_set.complete);
        Ok(hook_set)
    }
}

impl GraphWalkerListener for FlowBuilderListener<'_> {
    fn on_node_enter(&mut self, node: &Arc<GraphNode>, already_visited: bool) -> Result<()> {
        let ptr = Arc::as_ptr(node);
        let hook_set = if already_visited {
            // Shared resource: reuse the one task set already built.
            match self.built.get(&ptr) {
                Some(hs) => *hs,
                None => return Ok(()),
            }
        } else {
            let hs = self.build_hook_set(node.value())?;
            self.built.insert(ptr, hs);
            hs
        };

        if self.stack.is_empty() {
            self.roots.push(hook_set);
        }
        self.stack.push(hook_set);
        Ok(())
    }

    fn on_node_exit(&mut self, _node: &Arc<GraphNode>) -> Result<()> {
        let Some(child) = self.stack.pop() else {
            return Ok(());
        };
        if let Some(parent) = self.stack.last() {
            // Parents begin before their children and finish/complete after
            // them; `link` deduplicates, so a shared child is wired into
            // each parent exactly once.
            self.flow.link(parent.prepare_begin, child.prepare_begin);
            self.flow.link(child.prepare_finish, parent.prepare_finish);
            self.flow.link(child.complete, parent.complete);
        }
        Ok(())
    }
}

/// Walk `source_nodes` and add one operation's task DAG to `flow`.
///
/// Fails with a plugin-not-found error when a resource type has no
/// registered protection plugin. Returns the hook-sets of the graph roots
/// so callers can fence the whole operation with initiate/complete tasks.
#[allow(clippy::too_many_arguments)]
pub fn build_resource_flow(
    kind: OperationKind,
    flow: &mut TaskFlow,
    registry: &ProtectionRegistry,
    source_nodes: &[Arc<GraphNode>],
    checkpoint: Arc<Mutex<Checkpoint>>,
    context: Context,
    parameters: &Value,
    extras: &Map<String, Value>,
) -> Result<Vec<HookSet>> {
    let mut listener = FlowBuilderListener {
        kind,
        flow,
        registry,
        checkpoint,
        context,
        parameters,
        extras,
        stack: Vec::new(),
        built: HashMap::new(),
        roots: Vec::new(),
    };
    walk_graph(source_nodes, &mut listener)?;
    Ok(listener.roots)
}
