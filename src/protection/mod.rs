//! Protection and discovery plugin contracts, registries, and flow assembly
//!
//! Plugins are resolved through explicit registries populated at process
//! start: a type-tag → plugin map for discovery ([`ProtectableRegistry`])
//! and one for protection ([`ProtectionRegistry`]). The flow builder turns
//! a resource dependency graph into the per-resource four-phase task DAG.

mod flow_builder;
mod flows;

pub use flow_builder::{build_resource_flow, HookSet};
pub use flows::{
    build_delete_flow, build_protect_flow, build_restore_flow, build_verify_flow,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::checkpoint::Checkpoint;
use crate::resource::{build_graph, Context, GraphNode, Resource};
use crate::Result;

/// Plugin-resolution errors
#[derive(Error, Debug)]
pub enum ProtectionError {
    /// No protection plugin registered for a resource type
    #[error("No protection plugin registered for resource type: {0}")]
    PluginNotFound(String),
}

/// The four operation kinds a protection plugin serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Take a backup of the resource
    Protect,
    /// Rebuild the resource from a checkpoint
    Restore,
    /// Remove the resource's backup artifacts
    Delete,
    /// Check a checkpoint's artifacts for the resource
    Verify,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Protect => "protect",
            Self::Restore => "restore",
            Self::Delete => "delete",
            Self::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Everything a lifecycle hook receives
pub struct HookContext {
    /// The checkpoint the operation works against
    pub checkpoint: Arc<Mutex<Checkpoint>>,
    /// The resource this hook-set belongs to
    pub resource: Resource,
    /// Request context
    pub context: Context,
    /// Per-type parameters overlaid with per-`type#id` parameters
    pub parameters: Value,
    /// Operation-specific extras (restore target, template, ...)
    pub extras: Map<String, Value>,
}

/// One resource's lifecycle for one operation kind.
///
/// All four hooks are optional; the defaults do nothing. An error from any
/// hook fails the whole flow.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Runs before any dependent child's `on_prepare_begin`
    async fn on_prepare_begin(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    /// Runs after every dependent child's `on_prepare_finish`
    async fn on_prepare_finish(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    /// The operation's main work
    async fn on_main(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    /// Runs after every dependent child's `on_complete`
    async fn on_complete(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
}

/// Contract a per-resource-type protection plugin implements
pub trait ProtectionPlugin: Send + Sync {
    /// Operation performing backups of the resource
    fn get_protect_operation(&self, resource: &Resource) -> Arc<dyn Operation>;

    /// Operation rebuilding the resource from a checkpoint
    fn get_restore_operation(&self, resource: &Resource) -> Arc<dyn Operation>;

    /// Operation removing the resource's backup artifacts
    fn get_delete_operation(&self, resource: &Resource) -> Arc<dyn Operation>;

    /// Operation verifying a checkpoint's artifacts
    fn get_verify_operation(&self, resource: &Resource) -> Arc<dyn Operation>;
}

/// Contract a per-resource-type discovery plugin implements.
///
/// Discovery feeds the synchronous graph engine, so these methods are
/// synchronous; implementations do their own I/O internally.
pub trait ProtectablePlugin: Send + Sync {
    /// Type tag this plugin discovers (e.g. `"OS::Cinder::Volume"`)
    fn resource_type(&self) -> &str;

    /// Type tags whose resources may depend on this plugin's resources
    fn parent_resource_types(&self) -> &[&str];

    /// Enumerate all resources of this type visible in the context
    fn list_resources(&self, ctx: &Context, parameters: &Value) -> Result<Vec<Resource>>;

    /// Fetch one resource by id
    fn show_resource(&self, ctx: &Context, id: &str, parameters: &Value) -> Result<Resource>;

    /// Resources of this type that `parent` depends on
    fn get_dependent_resources(&self, ctx: &Context, parent: &Resource)
        -> Result<Vec<Resource>>;
}

/// Type-tag → protection plugin map
#[derive(Default)]
pub struct ProtectionRegistry {
    plugins: HashMap<String, Arc<dyn ProtectionPlugin>>,
}

impl ProtectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin for a resource type
    pub fn register(&mut self, resource_type: impl Into<String>, plugin: Arc<dyn ProtectionPlugin>) {
        self.plugins.insert(resource_type.into(), plugin);
    }

    /// Resolve the plugin for a resource type
    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn ProtectionPlugin>> {
        self.plugins
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProtectionError::PluginNotFound(resource_type.to_string()).into())
    }
}

/// Type-tag → discovery plugin map
#[derive(Default)]
pub struct ProtectableRegistry {
    plugins: HashMap<String, Arc<dyn ProtectablePlugin>>,
}

impl ProtectableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovery plugin under its own type tag
    pub fn register(&mut self, plugin: Arc<dyn ProtectablePlugin>) {
        self.plugins
            .insert(plugin.resource_type().to_string(), plugin);
    }

    /// Resolve the plugin for a resource type
    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn ProtectablePlugin>> {
        self.plugins
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProtectionError::PluginNotFound(resource_type.to_string()).into())
    }

    /// All resources `parent` directly depends on, unioned over every plugin
    /// that names the parent's type among its parent types.
    pub fn fetch_dependent_resources(
        &self,
        ctx: &Context,
        parent: &Resource,
    ) -> Result<Vec<Resource>> {
        let mut dependents = Vec::new();
        for plugin in self.plugins.values() {
            if plugin
                .parent_resource_types()
                .contains(&parent.resource_type())
            {
                dependents.extend(plugin.get_dependent_resources(ctx, parent)?);
            }
        }
        Ok(dependents)
    }

    /// Build the dependency DAG for a set of start resources
    pub fn build_graph(
        &self,
        ctx: &Context,
        resources: &[Resource],
    ) -> Result<Vec<Arc<GraphNode>>> {
        build_graph(resources, |parent| {
            self.fetch_dependent_resources(ctx, parent)
        })
    }
}
