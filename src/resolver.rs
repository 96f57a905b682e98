//! Dependency-ordered traversal shared by the kernel and the package manager.
//!
//! Pure function over a named dependency graph: produces an order in which
//! every dependency precedes its dependents, or fails on a cycle or a
//! reference to an unknown node. Ties are broken by registration order,
//! so the output is deterministic for a given input sequence.

use std::collections::HashMap;

use thiserror::Error;

/// A node in a dependency graph: a unique name plus the names it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Unique node name.
    pub name: String,
    /// Names of nodes that must precede this one.
    pub dependencies: Vec<String>,
}

impl GraphNode {
    /// Build a node from a name and its dependency names.
    pub fn new(
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Dependency resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The graph contains a cycle. `node` is where the cycle was detected.
    #[error("circular dependency detected at '{node}'")]
    CircularDependency {
        /// Node at which the back-edge was found.
        node: String,
    },
    /// A node references a dependency that is not in the graph.
    #[error("dependency '{name}' required by '{required_by}' is not registered")]
    DependencyNotFound {
        /// The missing dependency name.
        name: String,
        /// The node that declared it.
        required_by: String,
    },
}

/// Visit colors for the depth-first traversal.
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

/// Order `nodes` so that every dependency precedes its dependents.
///
/// Nodes are visited in the order given, and each node's dependencies in
/// their declared order, so the result is a stable topological order.
///
/// # Errors
///
/// Returns [`ResolveError::CircularDependency`] if the graph has a cycle,
/// or [`ResolveError::DependencyNotFound`] if a declared dependency is
/// absent from `nodes`.
pub fn resolve_order(nodes: &[GraphNode]) -> Result<Vec<String>, ResolveError> {
    let by_name: HashMap<&str, &GraphNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(nodes.len());
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());

    for node in nodes {
        visit(node, &by_name, &mut marks, &mut order)?;
    }

    Ok(order)
}

fn visit<'a>(
    node: &'a GraphNode,
    by_name: &HashMap<&str, &'a GraphNode>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), ResolveError> {
    match marks.get(node.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            return Err(ResolveError::CircularDependency {
                node: node.name.clone(),
            });
        }
        None => {}
    }

    marks.insert(&node.name, Mark::InProgress);

    for dep in &node.dependencies {
        let Some(dep_node) = by_name.get(dep.as_str()) else {
            return Err(ResolveError::DependencyNotFound {
                name: dep.clone(),
                required_by: node.name.clone(),
            });
        };
        visit(dep_node, by_name, marks, order)?;
    }

    marks.insert(&node.name, Mark::Done);
    order.push(node.name.clone());
    Ok(())
}
