use crate::store::{LineageGraph, NodeId, PathStep};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// All ancestors of `start_nodes` reachable through incoming edges.
/// The start nodes themselves are not part of the result.
pub fn upstream_from(graph: &LineageGraph, start_nodes: &[NodeId], active_only: bool) -> BTreeSet<NodeId> {
    let mut visited: HashSet<NodeId> = start_nodes.iter().copied().collect();
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        for edge_id in graph.incoming_ids(node) {
            let Ok(edge) = graph.edge(edge_id) else { continue };
            if active_only && !edge.active {
                continue;
            }
            for &parent in &edge.source_ids {
                if visited.insert(parent) {
                    found.insert(parent);
                    queue.push_back(parent);
                }
            }
        }
    }
    found
}

/// All descendants of `start_nodes` reachable through outgoing edges.
/// Used for impact analysis after an override.
pub fn downstream_from(graph: &LineageGraph, start_nodes: &[NodeId], active_only: bool) -> BTreeSet<NodeId> {
    let mut visited: HashSet<NodeId> = start_nodes.iter().copied().collect();
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        for edge_id in graph.outgoing_ids(node) {
            let Ok(edge) = graph.edge(edge_id) else { continue };
            if active_only && !edge.active {
                continue;
            }
            let child = edge.target_id;
            if visited.insert(child) {
                found.insert(child);
                queue.push_back(child);
            }
        }
    }
    found
}

/// True when any of `targets` is reachable from `start` through active edges.
/// Adding an active edge `targets -> start` would then close a cycle.
pub fn reaches_any(graph: &LineageGraph, start: NodeId, targets: &[NodeId]) -> bool {
    if targets.contains(&start) {
        return true;
    }
    let wanted: HashSet<NodeId> = targets.iter().copied().collect();
    downstream_from(graph, &[start], true)
        .iter()
        .any(|n| wanted.contains(n))
}

/// Breadth-first search over active edges. Outgoing edges are explored in
/// creation order, so among equally short paths the one using the oldest edges
/// wins.
pub fn shortest_path(graph: &LineageGraph, source: NodeId, target: NodeId) -> Option<Vec<PathStep>> {
    if source == target {
        return Some(Vec::new());
    }
    let mut came_from: HashMap<NodeId, PathStep> = HashMap::new();
    let mut visited = HashSet::from([source]);
    let mut queue = VecDeque::from([source]);

    while let Some(node) = queue.pop_front() {
        let mut out: Vec<_> = graph.outgoing_ids(node).collect();
        out.sort_unstable();
        out.dedup();
        for edge_id in out {
            let Ok(edge) = graph.edge(edge_id) else { continue };
            if !edge.active {
                continue;
            }
            let child = edge.target_id;
            if !visited.insert(child) {
                continue;
            }
            came_from.insert(child, PathStep { node, edge: edge_id });
            if child == target {
                let mut path = Vec::new();
                let mut cursor = child;
                while let Some(step) = came_from.get(&cursor) {
                    path.push(*step);
                    cursor = step.node;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(child);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeKind, EdgeSpec, FormulaComplexity, NodeKind, NodeSpec, OriginKey};

    fn calc() -> EdgeKind {
        EdgeKind::Calculation { formula: "a + b".into(), complexity: FormulaComplexity::SimpleArithmetic }
    }

    /// Shape: C1 -> A, C2 -> B, A+B -> D
    fn diamond() -> (LineageGraph, Vec<NodeId>) {
        let mut g = LineageGraph::new("t");
        let c1 = g.add_node(NodeSpec::source_cell(OriginKey::new("S", 1, 1), Some(1.0))).unwrap();
        let c2 = g.add_node(NodeSpec::source_cell(OriginKey::new("S", 2, 1), Some(2.0))).unwrap();
        let ext = |g: &mut LineageGraph, c: NodeId, v: f64| {
            let n = g.add_node(NodeSpec::new(NodeKind::Extracted).period("P").value(v)).unwrap();
            g.add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![c], n, "x")).unwrap();
            n
        };
        let a = ext(&mut g, c1, 1.0);
        let b = ext(&mut g, c2, 2.0);
        let d = g.add_node(NodeSpec::new(NodeKind::Calculated).period("P").value(3.0)).unwrap();
        g.add_edge(EdgeSpec::new(calc(), vec![a, b], d, "sum")).unwrap();
        (g, vec![c1, c2, a, b, d])
    }

    #[test]
    fn test_upstream_diamond() {
        let (g, ids) = diamond();
        let (c1, c2, a, b, d) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        assert_eq!(upstream_from(&g, &[d], true), BTreeSet::from([c1, c2, a, b]));
        assert_eq!(downstream_from(&g, &[c1], true), BTreeSet::from([a, d]));
    }

    #[test]
    fn test_reaches_any() {
        let (g, ids) = diamond();
        assert!(reaches_any(&g, ids[0], &[ids[4]]));
        assert!(!reaches_any(&g, ids[4], &[ids[0]]));
        assert!(reaches_any(&g, ids[3], &[ids[3]]));
    }

    #[test]
    fn test_shortest_path_hops() {
        let (g, ids) = diamond();
        let path = shortest_path(&g, ids[1], ids[4]).expect("path exists");
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].node, ids[1]);
        assert_eq!(path[1].node, ids[3]);
        assert!(shortest_path(&g, ids[0], ids[1]).is_none());
    }
}
