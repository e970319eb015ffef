//! Dependency-graph construction and traversal

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{GraphError, Resource};
use crate::Result;

/// A node in the resource dependency DAG.
///
/// Nodes are handed out as `Arc<GraphNode>`; a resource reachable through
/// multiple parents is represented by one node shared (pointer-identical)
/// between every parent's child list. That sharing is what makes
/// diamond-shaped dependencies (two servers attached to one volume) collapse
/// onto a single protection task set downstream.
#[derive(Debug)]
pub struct GraphNode {
    value: Resource,
    child_nodes: Vec<Arc<GraphNode>>,
}

impl GraphNode {
    /// The resource this node stands for
    pub fn value(&self) -> &Resource {
        &self.value
    }

    /// Direct dependents of this node, in discovery order
    pub fn child_nodes(&self) -> &[Arc<GraphNode>] {
        &self.child_nodes
    }

    pub(crate) fn new(value: Resource, child_nodes: Vec<Arc<GraphNode>>) -> Arc<Self> {
        Arc::new(Self { value, child_nodes })
    }
}

/// Listener interface for [`walk_graph`].
///
/// `on_node_enter` fires before a node's children are walked,
/// `on_node_exit` after. A node reached again through a second parent is
/// entered with `already_visited = true`; its children are still walked so
/// listeners can re-link shared sub-structures into the new parent.
pub trait GraphWalkerListener {
    /// Called on entering a node, before its children
    fn on_node_enter(&mut self, node: &Arc<GraphNode>, already_visited: bool) -> Result<()>;

    /// Called on leaving a node, after all its children
    fn on_node_exit(&mut self, node: &Arc<GraphNode>) -> Result<()>;
}

// DFS colors for build_graph
enum Color {
    Gray,
    Black(Arc<GraphNode>),
}

/// Build the dependency DAG for a set of start resources.
///
/// `get_child_nodes` resolves one resource's direct dependents. The builder
/// runs a three-color depth-first search: resources currently on the
/// recursion stack are gray, finished resources are black and memoized so a
/// shared descendant yields the same `Arc<GraphNode>` for every parent.
/// Re-entering a gray resource means the input is cyclic and fails with
/// [`GraphError::LoopDetected`].
///
/// Only true roots are returned: a start resource that turns out to be some
/// other start resource's descendant is dropped from the result. Root order
/// follows the original start order.
pub fn build_graph<F>(start_resources: &[Resource], mut get_child_nodes: F) -> Result<Vec<Arc<GraphNode>>>
where
    F: FnMut(&Resource) -> Result<Vec<Resource>>,
{
    let mut colors: HashMap<Resource, Color> = HashMap::new();
    let mut source_set: HashSet<Resource> = start_resources.iter().cloned().collect();

    fn visit<F>(
        resource: &Resource,
        colors: &mut HashMap<Resource, Color>,
        source_set: &mut HashSet<Resource>,
        get_child_nodes: &mut F,
    ) -> Result<Arc<GraphNode>>
    where
        F: FnMut(&Resource) -> Result<Vec<Resource>>,
    {
        match colors.get(resource) {
            Some(Color::Black(node)) => return Ok(Arc::clone(node)),
            Some(Color::Gray) => {
                return Err(GraphError::LoopDetected(resource.to_string()).into());
            }
            None => {}
        }

        colors.insert(resource.clone(), Color::Gray);
        let children = get_child_nodes(resource)?;
        let mut child_nodes = Vec::with_capacity(children.len());
        for child in &children {
            source_set.remove(child);
            child_nodes.push(visit(child, colors, source_set, get_child_nodes)?);
        }

        let node = GraphNode::new(resource.clone(), child_nodes);
        colors.insert(resource.clone(), Color::Black(Arc::clone(&node)));
        Ok(node)
    }

    let mut built: HashMap<Resource, Arc<GraphNode>> = HashMap::new();
    for resource in start_resources {
        let node = visit(resource, &mut colors, &mut source_set, &mut get_child_nodes)?;
        built.insert(resource.clone(), node);
    }

    // Preserve start order among the surviving roots.
    Ok(start_resources
        .iter()
        .filter(|r| source_set.contains(r))
        .filter_map(|r| built.get(r).cloned())
        .collect())
}

/// Depth-first walk over a set of root nodes with enter/exit callbacks.
///
/// One visited set spans the whole walk, keyed by node identity, so shared
/// subgraphs report `already_visited = true` on every visit after the first.
pub fn walk_graph(
    source_nodes: &[Arc<GraphNode>],
    listener: &mut dyn GraphWalkerListener,
) -> Result<()> {
    let mut visited: HashSet<*const GraphNode> = HashSet::new();
    for node in source_nodes {
        walk_node(node, listener, &mut visited)?;
    }
    Ok(())
}

fn walk_node(
    node: &Arc<GraphNode>,
    listener: &mut dyn GraphWalkerListener,
    visited: &mut HashSet<*const GraphNode>,
) -> Result<()> {
    let already_visited = !visited.insert(Arc::as_ptr(node));
    listener.on_node_enter(node, already_visited)?;
    for child in node.child_nodes() {
        walk_node(child, listener, visited)?;
    }
    listener.on_node_exit(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParasolError;

    fn res(t: &str, id: &str) -> Resource {
        Resource::new(t, id, id)
    }

    // A -> C, B -> C, C -> {D, E}
    fn diamond_children(r: &Resource) -> Result<Vec<Resource>> {
        Ok(match r.id() {
            "A" | "B" => vec![res("server", "C")],
            "C" => vec![res("volume", "D"), res("volume", "E")],
            _ => vec![],
        })
    }

    #[test]
    fn test_build_graph_shares_diamond_node() {
        let roots = build_graph(&[res("server", "A"), res("server", "B")], diamond_children)
            .expect("build failed");
        assert_eq!(roots.len(), 2);

        let c_from_a = &roots[0].child_nodes()[0];
        let c_from_b = &roots[1].child_nodes()[0];
        assert!(Arc::ptr_eq(c_from_a, c_from_b));
        assert_eq!(c_from_a.child_nodes().len(), 2);
    }

    #[test]
    fn test_build_graph_detects_cycle() {
        let cyclic = |r: &Resource| -> Result<Vec<Resource>> {
            Ok(match r.id() {
                "A" => vec![res("server", "B")],
                "B" => vec![res("server", "A")],
                _ => vec![],
            })
        };
        let err = build_graph(&[res("server", "A")], cyclic).unwrap_err();
        assert!(matches!(
            err,
            ParasolError::Graph(GraphError::LoopDetected(_))
        ));
    }

    #[test]
    fn test_build_graph_drops_reachable_start_nodes() {
        // C is both a start node and A's child: only A survives as a root.
        let roots = build_graph(&[res("server", "A"), res("server", "C")], diamond_children)
            .expect("build failed");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].value().id(), "A");
    }

    struct OrderRecorder {
        enters: Vec<(String, bool)>,
        exits: Vec<String>,
    }

    impl GraphWalkerListener for OrderRecorder {
        fn on_node_enter(&mut self, node: &Arc<GraphNode>, already_visited: bool) -> Result<()> {
            self.enters.push((node.value().id().to_string(), already_visited));
            Ok(())
        }

        fn on_node_exit(&mut self, node: &Arc<GraphNode>) -> Result<()> {
            self.exits.push(node.value().id().to_string());
            Ok(())
        }
    }

    #[test]
    fn test_walk_reports_shared_nodes_as_visited() {
        let roots = build_graph(&[res("server", "A"), res("server", "B")], diamond_children)
            .expect("build failed");
        let mut rec = OrderRecorder {
            enters: vec![],
            exits: vec![],
        };
        walk_graph(&roots, &mut rec).expect("walk failed");

        // C entered twice: fresh under A, already-visited under B, children
        // walked both times.
        let c_entries: Vec<bool> = rec
            .enters
            .iter()
            .filter(|(id, _)| id == "C")
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(c_entries, vec![false, true]);
        assert_eq!(rec.enters.iter().filter(|(id, _)| id == "D").count(), 2);
        // Exits are post-order: D and E before C's first exit.
        let first_c_exit = rec.exits.iter().position(|id| id == "C").unwrap();
        assert!(rec.exits.iter().position(|id| id == "D").unwrap() < first_c_exit);
        assert!(rec.exits.iter().position(|id| id == "E").unwrap() < first_c_exit);
    }
}
