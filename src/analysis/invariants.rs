//! Whole-graph verification of the lineage invariants.
use crate::confidence::MONOTONICITY_TOLERANCE;
use crate::error::LineageError;
use crate::store::{EdgeId, LineageGraph, NodeId, NodeKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

/// The specific category of an invariant breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantKind {
    /// The active-edge subgraph contains a cycle.
    Cycle,
    /// A produced node has no source cell among its active ancestors.
    Untraceable,
    /// An active edge raised confidence above its weakest source.
    Monotonicity,
    /// A node without a value carries non-zero confidence.
    OrphanValue,
    /// More than one active edge points into the same node.
    MultipleActiveProducers,
    /// An edge's stored confidence disagrees with its scoring record.
    ScoringMismatch,
}

/// A structured report of one breach.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub kind: InvariantKind,
    pub node: Option<NodeId>,
    pub edge: Option<EdgeId>,
    pub message: String,
}

impl From<InvariantViolation> for LineageError {
    fn from(v: InvariantViolation) -> Self {
        match v.kind {
            InvariantKind::Monotonicity | InvariantKind::ScoringMismatch => LineageError::ConfidenceViolation {
                target: v.node.unwrap_or_default(),
                edge: v.edge,
                confidence: f64::NAN,
                bound: f64::NAN,
            },
            InvariantKind::OrphanValue => LineageError::SpeculationViolation {
                target: v.node.unwrap_or_default(),
                sources: Vec::new(),
                reason: v.message,
            },
            _ => LineageError::LineageViolation {
                reason: v.message,
                nodes: v.node.into_iter().collect(),
                edges: v.edge.into_iter().collect(),
            },
        }
    }
}

/// Walks the whole graph and collects every invariant breach, like a linter
/// run before the numbers are handed to downstream models.
pub struct InvariantChecker<'a> {
    graph: &'a LineageGraph,
    errors: Vec<InvariantViolation>,
}

impl<'a> InvariantChecker<'a> {
    pub fn new(graph: &'a LineageGraph) -> Self {
        Self { graph, errors: Vec::new() }
    }

    /// # Returns
    /// - `Ok(())` if every invariant holds.
    /// - `Err(Vec<InvariantViolation>)` with every breach found.
    pub fn verify(mut self) -> Result<(), Vec<InvariantViolation>> {
        self.check_producers();
        self.check_edges();
        self.check_orphans();
        self.check_acyclic_and_traceable();

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn push(&mut self, kind: InvariantKind, node: Option<NodeId>, edge: Option<EdgeId>, message: String) {
        self.errors.push(InvariantViolation { kind, node, edge, message });
    }

    fn check_producers(&mut self) {
        let mut producers: Vec<Option<EdgeId>> = vec![None; self.graph.node_count()];
        for edge in self.graph.edges().filter(|e| e.active && !e.kind.is_supersession()) {
            let slot = &mut producers[edge.target_id.index()];
            if let Some(first) = *slot {
                self.push(
                    InvariantKind::MultipleActiveProducers,
                    Some(edge.target_id),
                    Some(edge.id),
                    format!("{} and {} are both active into {}", first, edge.id, edge.target_id),
                );
            } else {
                *slot = Some(edge.id);
            }
        }
    }

    fn check_edges(&mut self) {
        let graph = self.graph;
        for edge in graph.edges() {
            if edge.kind.is_supersession() {
                if edge.active {
                    self.push(InvariantKind::MultipleActiveProducers, Some(edge.target_id), Some(edge.id),
                        "supersession links are never active".into());
                }
                continue;
            }
            let expected = edge.scoring.confidence();
            if (edge.confidence - expected).abs() > MONOTONICITY_TOLERANCE
                || !(0.0..=1.0).contains(&edge.confidence)
            {
                self.push(InvariantKind::ScoringMismatch, Some(edge.target_id), Some(edge.id),
                    format!("stored {} but scoring yields {}", edge.confidence, expected));
            }
            if !edge.active {
                continue;
            }

            let Ok(target) = graph.node(edge.target_id) else { continue };
            if edge.is_user_override() {
                if edge.confidence != 1.0 {
                    self.push(InvariantKind::Monotonicity, Some(target.id), Some(edge.id),
                        format!("user override at {} instead of 1.0", edge.confidence));
                }
                continue;
            }
            let min_source = edge
                .source_ids
                .iter()
                .filter_map(|&id| graph.node(id).ok())
                .map(|n| n.confidence)
                .fold(f64::INFINITY, f64::min);
            if target.confidence > min_source + MONOTONICITY_TOLERANCE {
                self.push(InvariantKind::Monotonicity, Some(target.id), Some(edge.id),
                    format!("target at {:.6} exceeds weakest source {:.6}", target.confidence, min_source));
            }
        }
    }

    fn check_orphans(&mut self) {
        let graph = self.graph;
        for node in graph.nodes() {
            if node.value.is_none() && node.confidence != 0.0 {
                self.push(InvariantKind::OrphanValue, Some(node.id), None,
                    format!("{} has no value but confidence {}", node.id, node.confidence));
            }
        }
    }

    fn check_acyclic_and_traceable(&mut self) {
        let graph = self.graph;
        let mut dag: DiGraph<NodeId, EdgeId> = DiGraph::with_capacity(graph.node_count(), graph.edge_count());
        for node in graph.nodes() {
            dag.add_node(node.id);
        }
        for edge in graph.edges().filter(|e| e.active && !e.kind.is_supersession()) {
            for source in &edge.source_ids {
                dag.add_edge(NodeIndex::new(source.index()), NodeIndex::new(edge.target_id.index()), edge.id);
            }
        }

        let order = match toposort(&dag, None) {
            Ok(order) => order,
            Err(cycle) => {
                let node = dag[cycle.node_id()];
                self.push(InvariantKind::Cycle, Some(node), None,
                    format!("cycle among active edges involving {}", node));
                return;
            }
        };

        // A node is anchored when it is a source cell or any of its active
        // producer's sources is anchored. Topological order makes one pass enough.
        let mut anchored = vec![false; graph.node_count()];
        for idx in order {
            let id = dag[idx];
            let Ok(node) = graph.node(id) else { continue };
            if node.kind == NodeKind::SourceCell {
                anchored[id.index()] = true;
                continue;
            }
            let Ok(Some(producer)) = graph.active_producer(id) else { continue };
            anchored[id.index()] = producer.source_ids.iter().any(|s| anchored[s.index()]);
            if !anchored[id.index()] {
                self.push(InvariantKind::Untraceable, Some(id), Some(producer.id),
                    format!("{} has no source cell among its active ancestors", id));
            }
        }
    }
}

/// Convenience wrapper around [`InvariantChecker`].
pub fn verify(graph: &LineageGraph) -> Result<(), Vec<InvariantViolation>> {
    InvariantChecker::new(graph).verify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeKind, EdgeSpec, MappingTier, NodeSpec, OriginKey};

    #[test]
    fn test_clean_graph_verifies() {
        let mut g = LineageGraph::new("t");
        let c = g.add_node(NodeSpec::source_cell(OriginKey::new("S", 1, 1), Some(5.0))).unwrap();
        let e = g.add_node(NodeSpec::new(NodeKind::Extracted).period("P").value(5.0)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![c], e, "x")).unwrap();
        let m = g.add_node(NodeSpec::new(NodeKind::Mapped).concept("Cash").period("P").value(5.0)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Mapping { tier: MappingTier::FuzzyMatch }, vec![e], m, "fuzzy"))
            .unwrap();
        assert_eq!(verify(&g), Ok(()));
    }

    #[test]
    fn test_untraceable_chain_is_reported() {
        // A mapped node fed by an extracted node that has no source cell.
        let mut g = LineageGraph::new("t");
        let e = g.add_node(NodeSpec::new(NodeKind::Extracted).period("P")).unwrap();
        let m = g.add_node(NodeSpec::new(NodeKind::Mapped).concept("Cash").period("P")).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Mapping { tier: MappingTier::ExactMatch }, vec![e], m, "exact"))
            .unwrap();

        let errors = verify(&g).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, InvariantKind::Untraceable);
        assert_eq!(errors[0].node, Some(m));
    }

    #[test]
    fn test_violation_converts_to_lineage_error() {
        let v = InvariantViolation {
            kind: InvariantKind::Cycle,
            node: Some(NodeId(3)),
            edge: None,
            message: "cycle".into(),
        };
        match LineageError::from(v) {
            LineageError::LineageViolation { nodes, .. } => assert_eq!(nodes, vec![NodeId(3)]),
            other => panic!("Wrong error type: {other:?}"),
        }
    }
}
