//! Graph compiler: node/edge lists to an adjacency structure.
//!
//! Uses `petgraph` to model the workflow as a directed graph. Topological sort
//! rejects cycles, so every compiled graph is a DAG. Compilation builds a
//! fresh `CompiledGraph` and returns it only on success; the input slices are
//! never touched.

use std::collections::HashMap;

use flowline_types::automation::{Edge, Node};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural problems found while compiling a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownNode { edge_id: String, node_id: String },

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("cycle detected involving node '{0}'")]
    Cycle(String),
}

// ---------------------------------------------------------------------------
// CompiledGraph
// ---------------------------------------------------------------------------

/// An outgoing edge of a compiled node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Successor {
    pub edge_id: String,
    pub target: String,
    pub condition: Option<String>,
}

/// Validated adjacency structure for one workflow.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    /// Node ids in declaration order.
    order: Vec<String>,
    successors: HashMap<String, Vec<Successor>>,
    in_degree: HashMap<String, usize>,
}

impl CompiledGraph {
    /// Nodes with no incoming edge, in declaration order.
    pub fn start_nodes(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.in_degree.get(id.as_str()).copied().unwrap_or(0) == 0)
            .map(String::as_str)
            .collect()
    }

    /// Outgoing edges of `node_id` in declaration order.
    pub fn successors(&self, node_id: &str) -> &[Successor] {
        self.successors
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of incoming edges of `node_id`.
    pub fn in_degree(&self, node_id: &str) -> usize {
        self.in_degree.get(node_id).copied().unwrap_or(0)
    }

    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.in_degree.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a workflow's nodes and edges.
///
/// 1. Index nodes by id, rejecting duplicates.
/// 2. Resolve every edge endpoint, rejecting unknown ids.
/// 3. Run `petgraph::algo::toposort` to reject cycles (self-loops included).
/// 4. Build the adjacency map and in-degree table.
pub fn compile_graph(nodes: &[Node], edges: &[Edge]) -> Result<CompiledGraph, GraphError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::with_capacity(nodes.len());

    for node in nodes {
        if index.contains_key(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }

    let mut successors: HashMap<String, Vec<Successor>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> =
        nodes.iter().map(|n| (n.id.clone(), 0)).collect();

    for edge in edges {
        let unknown = |node_id: &str| GraphError::UnknownNode {
            edge_id: edge.id.clone(),
            node_id: node_id.to_string(),
        };
        let from = *index.get(edge.source.as_str()).ok_or_else(|| unknown(&edge.source))?;
        let to = *index.get(edge.target.as_str()).ok_or_else(|| unknown(&edge.target))?;
        graph.add_edge(from, to, ());

        successors.entry(edge.source.clone()).or_default().push(Successor {
            edge_id: edge.id.clone(),
            target: edge.target.clone(),
            condition: edge.condition.clone(),
        });
        if let Some(d) = in_degree.get_mut(&edge.target) {
            *d += 1;
        }
    }

    toposort(&graph, None).map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].to_string()))?;

    Ok(CompiledGraph {
        order: nodes.iter().map(|n| n.id.clone()).collect(),
        successors,
        in_degree,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::automation::NodeType;
    use std::collections::HashSet;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: NodeType::Log,
            name: id.to_string(),
            config: Default::default(),
            error_handling: None,
            max_retries: None,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}->{target}"),
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        }
    }

    fn nodes(ids: &[&str]) -> Vec<Node> {
        ids.iter().map(|id| node(id)).collect()
    }

    /// Independent in-degree count used to check the compiler.
    fn zero_in_degree(ids: &[&str], edges: &[Edge]) -> HashSet<String> {
        let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
        ids.iter()
            .filter(|id| !targets.contains(**id))
            .map(|id| id.to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Start nodes
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_nodes_equal_zero_in_degree_nodes() {
        let cases: Vec<(Vec<&str>, Vec<Edge>)> = vec![
            (vec!["a"], vec![]),
            (vec!["a", "b", "c"], vec![]),
            (vec!["a", "b", "c"], vec![edge("a", "b"), edge("b", "c")]),
            (
                vec!["a", "b", "c", "d"],
                vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
            ),
            (
                vec!["x", "y", "p", "q", "r"],
                vec![edge("x", "y"), edge("p", "r"), edge("q", "r")],
            ),
            (vec!["a", "b"], vec![edge("a", "b"), edge("a", "b")]),
        ];

        for (ids, edges) in cases {
            let graph = compile_graph(&nodes(&ids), &edges).unwrap();
            let starts: HashSet<String> =
                graph.start_nodes().into_iter().map(String::from).collect();
            assert_eq!(starts, zero_in_degree(&ids, &edges), "graph {ids:?}");
        }
    }

    #[test]
    fn test_start_nodes_keep_declaration_order() {
        let graph = compile_graph(&nodes(&["c", "a", "b"]), &[]).unwrap();
        assert_eq!(graph.start_nodes(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_empty_graph_compiles() {
        let graph = compile_graph(&[], &[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.start_nodes().is_empty());
    }

    // -----------------------------------------------------------------------
    // Adjacency
    // -----------------------------------------------------------------------

    #[test]
    fn test_successors_in_declaration_order() {
        let edges = vec![edge("a", "c"), edge("a", "b")];
        let graph = compile_graph(&nodes(&["a", "b", "c"]), &edges).unwrap();
        let targets: Vec<&str> = graph.successors("a").iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, vec!["c", "b"]);
        assert!(graph.successors("b").is_empty());
    }

    #[test]
    fn test_diamond_in_degree() {
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        let graph = compile_graph(&nodes(&["a", "b", "c", "d"]), &edges).unwrap();
        assert_eq!(graph.in_degree("a"), 0);
        assert_eq!(graph.in_degree("d"), 2);
    }

    #[test]
    fn test_edge_condition_carried() {
        let mut e = edge("a", "b");
        e.condition = Some("variables.ok == true".to_string());
        let graph = compile_graph(&nodes(&["a", "b"]), &[e]).unwrap();
        assert_eq!(
            graph.successors("a")[0].condition.as_deref(),
            Some("variables.ok == true")
        );
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[test]
    fn test_unknown_target_fails_without_mutation() {
        let input_nodes = nodes(&["a", "b"]);
        let input_edges = vec![edge("a", "b"), edge("b", "ghost")];
        let nodes_before = format!("{input_nodes:?}");
        let edges_before = format!("{input_edges:?}");

        let err = compile_graph(&input_nodes, &input_edges).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownNode {
                edge_id: "b->ghost".to_string(),
                node_id: "ghost".to_string()
            }
        );
        assert_eq!(format!("{input_nodes:?}"), nodes_before);
        assert_eq!(format!("{input_edges:?}"), edges_before);
    }

    #[test]
    fn test_unknown_source_fails() {
        let err = compile_graph(&nodes(&["a"]), &[edge("nope", "a")]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { node_id, .. } if node_id == "nope"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = compile_graph(&nodes(&["a", "a"]), &[]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".to_string()));
    }

    #[test]
    fn test_cycle_rejected() {
        let edges = vec![edge("a", "b"), edge("b", "c"), edge("c", "a")];
        let err = compile_graph(&nodes(&["a", "b", "c"]), &edges).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = compile_graph(&nodes(&["a"]), &[edge("a", "a")]).unwrap_err();
        assert_eq!(err, GraphError::Cycle("a".to_string()));
    }
}
