use graphcore::{GraphEdge, GraphNode, NodeId, ValidationError, WorkflowGraph};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// Computes execution order for a graph. Pure; no state, no I/O.
pub struct GraphAnalyzer;

impl GraphAnalyzer {
    /// Kahn's algorithm. Ready nodes are taken in the order they became
    /// eligible; the initial queue follows node declaration order.
    ///
    /// Nodes on a cycle (and everything downstream of one) never become
    /// eligible, so the result is shorter than `nodes` for cyclic graphs.
    /// Edges with an unknown endpoint are ignored.
    pub fn order(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<NodeId> {
        let mut position: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        let mut ids: Vec<&str> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !position.contains_key(node.id.as_str()) {
                position.insert(node.id.as_str(), ids.len());
                ids.push(node.id.as_str());
            }
        }

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut in_degree = vec![0usize; ids.len()];
        for edge in edges {
            let (Some(&from), Some(&to)) = (
                position.get(edge.source.as_str()),
                position.get(edge.target.as_str()),
            ) else {
                continue;
            };
            adjacency[from].push(to);
            in_degree[to] += 1;
        }

        let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(ids.len());

        while let Some(current) = queue.pop_front() {
            result.push(ids[current].to_string());
            for &next in &adjacency[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        result
    }

    /// Structural validation plus ordering. Fails before anything executes.
    pub fn validate(graph: &WorkflowGraph) -> Result<ExecutionPlan, ValidationError> {
        if graph.nodes.is_empty() {
            return Err(ValidationError::EmptyGraph);
        }

        let mut seen = HashSet::new();
        for node in &graph.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }

        let mut seen_edges = HashSet::new();
        for edge in &graph.edges {
            if !seen_edges.insert(edge.id.as_str()) {
                return Err(ValidationError::DuplicateEdge(edge.id.clone()));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(ValidationError::UnknownNode {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        let order = Self::order(&graph.nodes, &graph.edges);
        if order.len() < graph.nodes.len() {
            let cycles = Self::find_cycles(graph);
            tracing::warn!(
                workflow_id = %graph.id,
                ordered = order.len(),
                total = graph.nodes.len(),
                "graph contains a cycle"
            );
            return Err(ValidationError::CyclicDependency { cycles });
        }

        Ok(ExecutionPlan::new(graph, order))
    }

    /// Strongly connected components that form cycles, members in declaration order.
    pub fn find_cycles(graph: &WorkflowGraph) -> Vec<Vec<NodeId>> {
        let mut dag: DiGraph<usize, ()> = DiGraph::new();
        let mut node_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for (position, node) in graph.nodes.iter().enumerate() {
            node_to_index
                .entry(node.id.as_str())
                .or_insert_with(|| dag.add_node(position));
        }
        for edge in &graph.edges {
            if let (Some(&from), Some(&to)) = (
                node_to_index.get(edge.source.as_str()),
                node_to_index.get(edge.target.as_str()),
            ) {
                dag.add_edge(from, to, ());
            }
        }

        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&dag)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || dag.contains_edge(component[0], component[0])
            })
            .map(|component| {
                let mut positions: Vec<usize> = component.iter().map(|idx| dag[*idx]).collect();
                positions.sort_unstable();
                positions
            })
            .collect();
        cycles.sort();

        cycles
            .into_iter()
            .map(|positions| {
                positions
                    .into_iter()
                    .map(|p| graph.nodes[p].id.clone())
                    .collect()
            })
            .collect()
    }
}

/// Validated order plus per-node edge lookups.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub order: Vec<NodeId>,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
}

impl ExecutionPlan {
    fn new(graph: &WorkflowGraph, order: Vec<NodeId>) -> Self {
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, edge) in graph.edges.iter().enumerate() {
            incoming.entry(edge.target.clone()).or_default().push(i);
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }
        Self {
            order,
            incoming,
            outgoing,
        }
    }

    /// Incoming edges of `node_id`, in declaration order.
    pub fn incoming<'a>(&self, graph: &'a WorkflowGraph, node_id: &str) -> Vec<&'a GraphEdge> {
        Self::edges(&self.incoming, graph, node_id)
    }

    pub fn outgoing<'a>(&self, graph: &'a WorkflowGraph, node_id: &str) -> Vec<&'a GraphEdge> {
        Self::edges(&self.outgoing, graph, node_id)
    }

    fn edges<'a>(
        index: &HashMap<NodeId, Vec<usize>>,
        graph: &'a WorkflowGraph,
        node_id: &str,
    ) -> Vec<&'a GraphEdge> {
        index
            .get(node_id)
            .map(|positions| positions.iter().filter_map(|&i| graph.edges.get(i)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphcore::NodeKind;

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        let mut graph = WorkflowGraph::with_id("wf");
        for id in ids {
            graph.add_node(GraphNode::new(*id, NodeKind::Transform));
        }
        for (from, to) in edges {
            graph.connect(from, to);
        }
        graph
    }

    fn position(order: &[NodeId], id: &str) -> usize {
        order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn test_diamond_order() {
        let g = graph(&["A", "B", "C", "D"], &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        let order = GraphAnalyzer::order(&g.nodes, &g.edges);
        assert_eq!(order, vec!["A", "B", "C", "D"]);
        for edge in &g.edges {
            assert!(position(&order, &edge.source) < position(&order, &edge.target));
        }
    }

    #[test]
    fn test_fifo_tie_break_is_deterministic() {
        // Declared out of dependency order; roots come out in declaration order.
        let g = graph(&["out", "r2", "r1", "mid"], &[("r1", "mid"), ("r2", "mid"), ("mid", "out")]);
        let first = GraphAnalyzer::order(&g.nodes, &g.edges);
        assert_eq!(first, vec!["r2", "r1", "mid", "out"]);
        for _ in 0..10 {
            assert_eq!(GraphAnalyzer::order(&g.nodes, &g.edges), first);
        }
    }

    #[test]
    fn test_eligibility_order_not_declaration_order() {
        // "late" becomes eligible after "b" even though it is declared first.
        let g = graph(&["late", "a", "b"], &[("a", "late"), ("a", "b")]);
        let order = GraphAnalyzer::order(&g.nodes, &g.edges);
        assert_eq!(order, vec!["a", "late", "b"]);
    }

    #[test]
    fn test_two_node_cycle_is_short() {
        let g = graph(&["A", "B"], &[("A", "B"), ("B", "A")]);
        assert!(GraphAnalyzer::order(&g.nodes, &g.edges).len() < 2);

        match GraphAnalyzer::validate(&g) {
            Err(ValidationError::CyclicDependency { cycles }) => {
                assert_eq!(cycles, vec![vec!["A".to_string(), "B".to_string()]]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_downstream_is_excluded() {
        let g = graph(&["root", "x", "y", "tail"], &[("root", "x"), ("x", "y"), ("y", "x"), ("y", "tail")]);
        let order = GraphAnalyzer::order(&g.nodes, &g.edges);
        assert_eq!(order, vec!["root"]);
    }

    #[test]
    fn test_self_loop_detected() {
        let g = graph(&["solo"], &[("solo", "solo")]);
        assert!(matches!(
            GraphAnalyzer::validate(&g),
            Err(ValidationError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_disconnected_nodes_are_ordered() {
        let g = graph(&["a", "b", "c"], &[("a", "b")]);
        let plan = GraphAnalyzer::validate(&g).unwrap();
        assert_eq!(plan.order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let mut g = graph(&["a"], &[]);
        g.edges.push(GraphEdge::new("e1", "a", "ghost"));
        assert_eq!(
            GraphAnalyzer::validate(&g).unwrap_err(),
            ValidationError::UnknownNode {
                edge_id: "e1".into(),
                node_id: "ghost".into()
            }
        );
        // order() itself ignores the dangling edge
        assert_eq!(GraphAnalyzer::order(&g.nodes, &g.edges), vec!["a"]);
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            GraphAnalyzer::validate(&WorkflowGraph::new()).unwrap_err(),
            ValidationError::EmptyGraph
        );
        let g = graph(&["a", "a"], &[]);
        assert_eq!(
            GraphAnalyzer::validate(&g).unwrap_err(),
            ValidationError::DuplicateNode("a".into())
        );
        let mut g = graph(&["a", "b"], &[("a", "b")]);
        g.edges.push(g.edges[0].clone());
        assert!(matches!(
            GraphAnalyzer::validate(&g),
            Err(ValidationError::DuplicateEdge(_))
        ));
    }

    #[test]
    fn test_plan_edge_lookup() {
        let g = graph(&["a", "b", "c"], &[("a", "c"), ("b", "c")]);
        let plan = GraphAnalyzer::validate(&g).unwrap();
        let incoming: Vec<_> = plan.incoming(&g, "c").iter().map(|e| e.source.as_str()).collect();
        assert_eq!(incoming, vec!["a", "b"]);
        assert_eq!(plan.outgoing(&g, "a").len(), 1);
        assert!(plan.incoming(&g, "a").is_empty());
    }

    #[test]
    fn test_acyclic_graphs_respect_edges() {
        let cases: Vec<(Vec<&str>, Vec<(&str, &str)>)> = vec![
            (vec!["a"], vec![]),
            (vec!["a", "b", "c", "d"], vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]),
            (vec!["a", "b", "c", "d", "e"], vec![("a", "e"), ("b", "e"), ("c", "e"), ("d", "e")]),
            (vec!["a", "b", "c", "x", "y"], vec![("a", "b"), ("b", "c"), ("x", "y")]),
            (
                vec!["a", "b", "c", "d", "e", "f"],
                vec![("a", "c"), ("b", "c"), ("c", "d"), ("a", "e"), ("d", "f"), ("e", "f")],
            ),
            (vec!["a", "b", "c", "d"], vec![("a", "d"), ("a", "b"), ("b", "c"), ("c", "d")]),
        ];

        for (nodes, edges) in &cases {
            // Declared backwards so declaration order alone cannot satisfy the edges
            let reversed: Vec<&str> = nodes.iter().rev().copied().collect();
            let g = graph(&reversed, edges);

            let order = GraphAnalyzer::order(&g.nodes, &g.edges);
            assert_eq!(order.len(), nodes.len());
            let unique: HashSet<_> = order.iter().collect();
            assert_eq!(unique.len(), nodes.len());
            for edge in &g.edges {
                assert!(
                    position(&order, &edge.source) < position(&order, &edge.target),
                    "{} must come before {} in {:?}",
                    edge.source,
                    edge.target,
                    order
                );
            }
        }
    }
}
