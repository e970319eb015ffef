//! Resources and the dependency-graph engine
//!
//! A [`Resource`] identifies one cloud entity (a server, a volume, a network
//! share, ...). Resources are assembled into an acyclic, shared-node
//! dependency DAG by [`build_graph`], walked with [`walk_graph`], and
//! serialized through [`pack_graph`]/[`unpack_graph`].

mod graph;
mod packed;

pub use graph::{build_graph, walk_graph, GraphNode, GraphWalkerListener};
pub use packed::{pack_graph, unpack_graph, PackedGraph};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors from graph construction and (un)packing
#[derive(Error, Debug)]
pub enum GraphError {
    /// A dependency cycle was found while building the graph
    #[error("Loop detected in resource graph at {0}")]
    LoopDetected(String),

    /// A packed graph violated the topological adjacency invariant
    #[error("Invalid packed graph: {0}")]
    InvalidPackedGraph(String),
}

/// An identified, typed, named cloud entity subject to protection.
///
/// Identity (equality and hashing) covers `(resource_type, id, name)` only;
/// `extra_info` is an opaque payload carried alongside. Fields are private,
/// so a resource cannot be altered after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    resource_type: String,
    id: String,
    name: String,
    extra_info: Option<Value>,
}

impl Resource {
    /// Create a resource without extra info
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            name: name.into(),
            extra_info: None,
        }
    }

    /// Attach an opaque extra-info payload
    pub fn with_extra_info(mut self, extra_info: Value) -> Self {
        self.extra_info = Some(extra_info);
        self
    }

    /// Type tag of the resource (e.g. `"OS::Cinder::Volume"`)
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Provider-assigned identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque extra-info payload, if any
    pub fn extra_info(&self) -> Option<&Value> {
        self.extra_info.as_ref()
    }

    /// `"<type>#<id>"`, the per-resource parameter overlay key
    pub fn key(&self) -> String {
        format!("{}#{}", self.resource_type, self.id)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
            && self.id == other.id
            && self.name == other.name
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.id.hash(state);
        self.name.hash(state);
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}({})", self.resource_type, self.id, self.name)
    }
}

/// Request context threaded through plugin calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    /// Tenant/project the request acts on behalf of
    pub project_id: String,
    /// Requesting user, if known
    pub user_id: Option<String>,
}

impl Context {
    /// Create a context for a project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_resource_identity_ignores_extra_info() {
        let a = Resource::new("OS::Cinder::Volume", "v1", "data");
        let b = Resource::new("OS::Cinder::Volume", "v1", "data")
            .with_extra_info(json!({"availability_zone": "az1"}));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_resource_key() {
        let r = Resource::new("OS::Nova::Server", "s1", "web");
        assert_eq!(r.key(), "OS::Nova::Server#s1");
    }
}
