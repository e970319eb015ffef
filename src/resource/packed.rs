//! Wire/storage representation of a resource graph
//!
//! A packed graph serializes as a two-element JSON array
//! `[nodes_object, adjacency_array]`: the node table maps hex serial ids
//! (`"0x<n>"`) to `[type, id, name, extra_info]` tuples, and the adjacency
//! array holds `[parent_id, [child_id, ...]]` pairs in children-first
//! (topological) order. This is the format embedded in a checkpoint's
//! `resource_graph` field.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::{walk_graph, GraphNode, GraphWalkerListener};
use super::{GraphError, Resource};
use crate::Result;

type ResourceEntry = (String, String, String, Option<Value>);

/// Serialized form of a resource dependency DAG
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackedGraph(HashMap<String, ResourceEntry>, Vec<(String, Vec<String>)>);

impl PackedGraph {
    /// Serial-id → resource table
    pub fn nodes(&self) -> &HashMap<String, ResourceEntry> {
        &self.0
    }

    /// `(parent, children)` pairs in emission (topological) order
    pub fn adjacency(&self) -> &[(String, Vec<String>)] {
        &self.1
    }
}

struct PackListener {
    next_serial: u64,
    serials: HashMap<*const GraphNode, String>,
    nodes: HashMap<String, ResourceEntry>,
    adjacency: Vec<(String, Vec<String>)>,
}

impl GraphWalkerListener for PackListener {
    fn on_node_enter(&mut self, _node: &Arc<GraphNode>, _already_visited: bool) -> Result<()> {
        Ok(())
    }

    fn on_node_exit(&mut self, node: &Arc<GraphNode>) -> Result<()> {
        let ptr = Arc::as_ptr(node);
        if self.serials.contains_key(&ptr) {
            // Shared node, already serialized on its first exit.
            return Ok(());
        }

        let serial = format!("0x{:x}", self.next_serial);
        self.next_serial += 1;

        let r = node.value();
        self.nodes.insert(
            serial.clone(),
            (
                r.resource_type().to_string(),
                r.id().to_string(),
                r.name().to_string(),
                r.extra_info().cloned(),
            ),
        );

        if !node.child_nodes().is_empty() {
            // Children exit before their parent, so every child already has
            // a serial here.
            let children = node
                .child_nodes()
                .iter()
                .map(|c| self.serials[&Arc::as_ptr(c)].clone())
                .collect();
            self.adjacency.push((serial.clone(), children));
        }

        self.serials.insert(ptr, serial);
        Ok(())
    }
}

/// Serialize a resource DAG into its packed representation.
///
/// Serial ids are assigned on walker exit (post-order), so children always
/// precede the parents that reference them in the adjacency list. Shared
/// nodes are recorded exactly once.
pub fn pack_graph(source_nodes: &[Arc<GraphNode>]) -> Result<PackedGraph> {
    let mut listener = PackListener {
        next_serial: 0,
        serials: HashMap::new(),
        nodes: HashMap::new(),
        adjacency: Vec::new(),
    };
    walk_graph(source_nodes, &mut listener)?;
    Ok(PackedGraph(listener.nodes, listener.adjacency))
}

fn entry_to_resource(entry: &ResourceEntry) -> Resource {
    let resource = Resource::new(entry.0.clone(), entry.1.clone(), entry.2.clone());
    match &entry.3 {
        Some(extra) => resource.with_extra_info(extra.clone()),
        None => resource,
    }
}

/// Rebuild a resource DAG from its packed representation.
///
/// Adjacency pairs are replayed in order: a child id seen for the first time
/// becomes a leaf node; a parent assembles from already-built children.
/// Reprocessing a parent id means the list is not topologically ordered and
/// fails with [`GraphError::InvalidPackedGraph`]. Serial ids never referenced
/// as a child and never processed as a parent come back as childless roots.
pub fn unpack_graph(packed: &PackedGraph) -> Result<Vec<Arc<GraphNode>>> {
    let mut built: HashMap<String, Arc<GraphNode>> = HashMap::new();
    let mut referenced: HashSet<String> = HashSet::new();

    let lookup = |serial: &str| -> Result<Resource> {
        packed
            .nodes()
            .get(serial)
            .map(entry_to_resource)
            .ok_or_else(|| {
                GraphError::InvalidPackedGraph(format!("unknown serial id {serial}")).into()
            })
    };

    for (parent, children) in packed.adjacency() {
        if built.contains_key(parent) {
            return Err(GraphError::InvalidPackedGraph(format!(
                "parent {parent} processed after it was already built"
            ))
            .into());
        }

        let mut child_nodes = Vec::with_capacity(children.len());
        for child in children {
            referenced.insert(child.clone());
            let node = match built.get(child) {
                Some(node) => Arc::clone(node),
                None => {
                    let leaf = GraphNode::new(lookup(child)?, Vec::new());
                    built.insert(child.clone(), Arc::clone(&leaf));
                    leaf
                }
            };
            child_nodes.push(node);
        }

        built.insert(parent.clone(), GraphNode::new(lookup(parent)?, child_nodes));
    }

    // Stable root order: ascending serial id.
    let mut serials: Vec<&String> = packed.nodes().keys().collect();
    serials.sort_by_key(|s| parse_serial(s));

    let mut roots = Vec::new();
    for serial in serials {
        if referenced.contains(serial) {
            continue;
        }
        match built.get(serial) {
            Some(node) => roots.push(Arc::clone(node)),
            // Never a parent, never a child: emitted as an isolated root.
            None => roots.push(GraphNode::new(lookup(serial)?, Vec::new())),
        }
    }
    Ok(roots)
}

fn parse_serial(serial: &str) -> u64 {
    serial
        .strip_prefix("0x")
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .unwrap_or(u64::MAX)
}
