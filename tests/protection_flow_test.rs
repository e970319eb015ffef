// Integration tests for the resource flow builder and the operation flows,
// executed with the real flow engine against the in-memory bank backend.

use std::sync::Arc;

use async_trait::async_trait;
use parasol::bank::{Bank, MemoryBankPlugin};
use parasol::checkpoint::{Checkpoint, CheckpointCollection, CheckpointStatus, ProtectionPlan};
use parasol::flow::{FlowEngine, TaskFlow};
use parasol::protection::{
    build_delete_flow, build_protect_flow, build_resource_flow, build_restore_flow,
    build_verify_flow, HookContext, Operation, OperationKind, ProtectionPlugin,
    ProtectionRegistry,
};
use parasol::resource::{build_graph, Context, GraphNode, Resource};
use parasol::{ParasolError, Result};
use parking_lot::Mutex as StdMutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map};
use tokio::sync::Mutex;

type Log = Arc<StdMutex<Vec<String>>>;

struct RecordingOperation {
    kind: OperationKind,
    log: Log,
    fail_main_of: Option<String>,
}

impl RecordingOperation {
    fn record(&self, phase: &str, ctx: &HookContext) {
        self.log
            .lock()
            .push(format!("{}:{}:{}", self.kind, phase, ctx.resource.id()));
    }
}

#[async_trait]
impl Operation for RecordingOperation {
    async fn on_prepare_begin(&self, ctx: &HookContext) -> Result<()> {
        self.record("prepare_begin", ctx);
        Ok(())
    }

    async fn on_prepare_finish(&self, ctx: &HookContext) -> Result<()> {
        self.record("prepare_finish", ctx);
        Ok(())
    }

    async fn on_main(&self, ctx: &HookContext) -> Result<()> {
        if self.fail_main_of.as_deref() == Some(ctx.resource.id()) {
            return Err(ParasolError::Other(anyhow::anyhow!(
                "induced failure in main of {}",
                ctx.resource.id()
            )));
        }
        self.record("main", ctx);
        // Plugins persist artifacts through the checkpoint's bank section.
        let checkpoint = ctx.checkpoint.lock().await;
        let section = checkpoint.get_resource_bank_section(ctx.resource.id())?;
        section
            .update_object("artifact", json!({"parameters": ctx.parameters}))
            .await?;
        Ok(())
    }

    async fn on_complete(&self, ctx: &HookContext) -> Result<()> {
        self.record("complete", ctx);
        Ok(())
    }
}

struct RecordingPlugin {
    log: Log,
    fail_main_of: Option<String>,
}

impl ProtectionPlugin for RecordingPlugin {
    fn get_protect_operation(&self, _resource: &Resource) -> Arc<dyn Operation> {
        self.operation(OperationKind::Protect)
    }

    fn get_restore_operation(&self, _resource: &Resource) -> Arc<dyn Operation> {
        self.operation(OperationKind::Restore)
    }

    fn get_delete_operation(&self, _resource: &Resource) -> Arc<dyn Operation> {
        self.operation(OperationKind::Delete)
    }

    fn get_verify_operation(&self, _resource: &Resource) -> Arc<dyn Operation> {
        self.operation(OperationKind::Verify)
    }
}

impl RecordingPlugin {
    fn operation(&self, kind: OperationKind) -> Arc<dyn Operation> {
        Arc::new(RecordingOperation {
            kind,
            log: Arc::clone(&self.log),
            fail_main_of: self.fail_main_of.clone(),
        })
    }
}

fn registry(log: &Log, fail_main_of: Option<&str>) -> ProtectionRegistry {
    let mut registry = ProtectionRegistry::new();
    for resource_type in ["server", "volume"] {
        registry.register(
            resource_type,
            Arc::new(RecordingPlugin {
                log: Arc::clone(log),
                fail_main_of: fail_main_of.map(str::to_string),
            }),
        );
    }
    registry
}

// A -> C, B -> C, C -> {D, E}
fn diamond() -> Vec<Arc<GraphNode>> {
    build_graph(
        &[
            Resource::new("server", "A", "A"),
            Resource::new("server", "B", "B"),
        ],
        |r| {
            Ok(match r.id() {
                "A" | "B" => vec![Resource::new("server", "C", "C")],
                "C" => vec![
                    Resource::new("volume", "D", "D"),
                    Resource::new("volume", "E", "E"),
                ],
                _ => vec![],
            })
        },
    )
    .expect("build failed")
}

async fn checkpoint() -> Arc<Mutex<Checkpoint>> {
    let bank = Bank::new(Arc::new(MemoryBankPlugin::new("flow-owner")));
    let collection = CheckpointCollection::new(&bank).unwrap();
    let plan = ProtectionPlan::new("plan-1", "nightly", "provider-1", vec![]);
    let checkpoint = collection
        .create("provider-1", &plan, "project-1", None)
        .await
        .unwrap();
    Arc::new(Mutex::new(checkpoint))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn position(entries: &[String], needle: &str) -> usize {
    entries
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("missing log entry {needle}"))
}

#[tokio::test]
async fn test_diamond_graph_builds_four_tasks_per_distinct_resource() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let mut flow = TaskFlow::new();

    build_resource_flow(
        OperationKind::Protect,
        &mut flow,
        &registry,
        &diamond(),
        checkpoint().await,
        Context::new("project-1"),
        &json!({}),
        &Map::new(),
    )
    .unwrap();

    // 5 distinct resources (A, B, C, D, E), 4 hook tasks each.
    assert_eq!(flow.task_count(), 20);
}

#[tokio::test]
async fn test_diamond_hook_order_and_single_execution() {
    init_tracing();
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let mut flow = TaskFlow::new();

    build_resource_flow(
        OperationKind::Protect,
        &mut flow,
        &registry,
        &diamond(),
        checkpoint().await,
        Context::new("project-1"),
        &json!({}),
        &Map::new(),
    )
    .unwrap();
    FlowEngine::new().run(&flow).await.expect("flow failed");

    let entries = log.lock().clone();
    // Shared C ran each hook exactly once despite two parents.
    for phase in ["prepare_begin", "prepare_finish", "main", "complete"] {
        let needle = format!("protect:{phase}:C");
        assert_eq!(
            entries.iter().filter(|e| **e == needle).count(),
            1,
            "expected exactly one {needle}"
        );
    }

    // Parents begin before children, complete after them.
    let begin_c = position(&entries, "protect:prepare_begin:C");
    assert!(position(&entries, "protect:prepare_begin:A") < begin_c);
    assert!(position(&entries, "protect:prepare_begin:B") < begin_c);
    assert!(begin_c < position(&entries, "protect:prepare_begin:D"));
    assert!(begin_c < position(&entries, "protect:prepare_begin:E"));

    let complete_c = position(&entries, "protect:complete:C");
    assert!(position(&entries, "protect:complete:D") < complete_c);
    assert!(position(&entries, "protect:complete:E") < complete_c);
    assert!(complete_c < position(&entries, "protect:complete:A"));
    assert!(complete_c < position(&entries, "protect:complete:B"));

    // Children finish before their parents.
    assert!(
        position(&entries, "protect:prepare_finish:D")
            < position(&entries, "protect:prepare_finish:C")
    );
    assert!(
        position(&entries, "protect:prepare_finish:C")
            < position(&entries, "protect:prepare_finish:A")
    );
}

#[tokio::test]
async fn test_parameter_overlay_reaches_hooks() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let checkpoint = checkpoint().await;
    let mut flow = TaskFlow::new();

    let parameters = json!({
        "volume": {"backup_mode": "incremental"},
        "volume#D": {"backup_mode": "full", "priority": "high"}
    });
    build_resource_flow(
        OperationKind::Protect,
        &mut flow,
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &parameters,
        &Map::new(),
    )
    .unwrap();
    FlowEngine::new().run(&flow).await.expect("flow failed");

    let cp = checkpoint.lock().await;
    let d_artifact = cp
        .get_resource_bank_section("D")
        .unwrap()
        .get_object("artifact")
        .await
        .unwrap();
    assert_eq!(
        d_artifact["parameters"],
        json!({"backup_mode": "full", "priority": "high"})
    );

    let e_artifact = cp
        .get_resource_bank_section("E")
        .unwrap()
        .get_object("artifact")
        .await
        .unwrap();
    assert_eq!(e_artifact["parameters"], json!({"backup_mode": "incremental"}));
}

#[tokio::test]
async fn test_missing_protection_plugin_fails_flow_construction() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let mut registry = ProtectionRegistry::new();
    registry.register(
        "server",
        Arc::new(RecordingPlugin {
            log: Arc::clone(&log),
            fail_main_of: None,
        }),
    );
    // No plugin for "volume": construction fails before anything runs.
    let mut flow = TaskFlow::new();
    let err = build_resource_flow(
        OperationKind::Protect,
        &mut flow,
        &registry,
        &diamond(),
        checkpoint().await,
        Context::new("project-1"),
        &json!({}),
        &Map::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ParasolError::Protection(_)));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_protect_flow_marks_checkpoint_available() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let checkpoint = checkpoint().await;

    let flow = build_protect_flow(
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &json!({}),
    )
    .unwrap();
    assert_eq!(flow.task_count(), 22); // 20 hooks + initiate + complete

    FlowEngine::new().run(&flow).await.expect("flow failed");
    assert_eq!(checkpoint.lock().await.status(), CheckpointStatus::Available);
}

#[tokio::test]
async fn test_failed_protect_flow_reverts_to_error_status() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, Some("D"));
    let checkpoint = checkpoint().await;

    let flow = build_protect_flow(
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &json!({}),
    )
    .unwrap();
    let err = FlowEngine::new().run(&flow).await.unwrap_err();
    assert!(matches!(err, ParasolError::Flow(_)));

    let cp = checkpoint.lock().await;
    assert_eq!(cp.status(), CheckpointStatus::Error);
    assert!(cp.record().extra_info.contains_key("finished_at"));
}

#[tokio::test]
async fn test_delete_flow_deletes_checkpoint() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let checkpoint = checkpoint().await;

    let flow = build_delete_flow(
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &json!({}),
    )
    .unwrap();
    FlowEngine::new().run(&flow).await.expect("flow failed");

    assert_eq!(checkpoint.lock().await.status(), CheckpointStatus::Deleted);
    let entries = log.lock().clone();
    assert!(entries.iter().any(|e| e == "delete:main:C"));
}

#[tokio::test]
async fn test_restore_flow_passes_extras_through() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let checkpoint = checkpoint().await;

    let mut extras = Map::new();
    extras.insert("restore".to_string(), json!({"target": "region-2"}));
    let flow = build_restore_flow(
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &json!({}),
        &extras,
    )
    .unwrap();
    assert_eq!(flow.task_count(), 20); // no fencing tasks on restore

    FlowEngine::new().run(&flow).await.expect("flow failed");
    let entries = log.lock().clone();
    assert_eq!(entries.iter().filter(|e| e.starts_with("restore:main:")).count(), 5);
}

#[tokio::test]
async fn test_verify_flow_runs_all_hooks() {
    let log: Log = Arc::new(StdMutex::new(Vec::new()));
    let registry = registry(&log, None);
    let checkpoint = checkpoint().await;

    let flow = build_verify_flow(
        &registry,
        &diamond(),
        Arc::clone(&checkpoint),
        Context::new("project-1"),
        &json!({}),
        &Map::new(),
    )
    .unwrap();
    assert_eq!(flow.task_count(), 20);

    FlowEngine::new().run(&flow).await.expect("flow failed");
    let entries = log.lock().clone();
    assert_eq!(entries.iter().filter(|e| e.starts_with("verify:")).count(), 20);
}
