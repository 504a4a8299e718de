//! User overrides: the only path that may retire an active producer.
use crate::error::{LineageError, LineageResult};
use crate::store::{
    AggregationStrategy, EdgeId, EdgeKind, EdgeSpec, FormulaComplexity, LineageGraph, MappingTier, Node,
    NodeId, NodeKind,
};
use tracing::info;

const METHOD: &str = "user_override";

/// Finds the node that currently stands for `(concept, period)`.
///
/// Preference: the latest active calculated node, then the latest aggregated
/// node, then the single mapped node.
pub fn locate_slot(graph: &LineageGraph, concept: &str, period: &str) -> LineageResult<NodeId> {
    let nodes = graph.query_by_concept(concept, Some(period));

    let latest = |pred: &dyn Fn(&Node) -> bool| nodes.iter().rev().find(|n| pred(n)).map(|n| n.id);
    if let Some(id) = latest(&|n: &Node| n.kind == NodeKind::Calculated && n.active) {
        return Ok(id);
    }
    if let Some(id) = latest(&|n: &Node| n.kind == NodeKind::Aggregated) {
        return Ok(id);
    }

    let mapped: Vec<NodeId> = nodes.iter().filter(|n| n.kind == NodeKind::Mapped).map(|n| n.id).collect();
    match mapped.as_slice() {
        [] => Err(LineageError::SlotNotFound { concept: concept.to_string(), period: period.to_string() }),
        [only] => Ok(*only),
        _ => Err(LineageError::violation(format!(
            "({concept}, {period}) has several mapped nodes and no aggregation; override is ambiguous"
        ))
        .with_nodes(mapped)),
    }
}

/// Edge kind for an override into a slot node of the given kind.
fn override_kind(slot: NodeKind) -> LineageResult<EdgeKind> {
    match slot {
        NodeKind::Mapped => Ok(EdgeKind::Mapping { tier: MappingTier::UserOverride }),
        NodeKind::Aggregated => Ok(EdgeKind::Aggregation {
            strategy: AggregationStrategy::SingleValue,
            excluded: Vec::new(),
        }),
        NodeKind::Calculated => Ok(EdgeKind::Calculation {
            formula: "user override".to_string(),
            complexity: FormulaComplexity::SimpleArithmetic,
        }),
        other => Err(LineageError::violation(format!("{} nodes cannot be overridden", other.as_str()))),
    }
}

/// Replaces the producer of the `(concept, period)` slot with a user-sanctioned
/// edge from `new_source` at confidence 1.0.
///
/// Nodes are immutable, so the source must hold exactly the slot's value; an
/// override confirms where a number comes from, it never changes the number.
///
/// The previous producer is deactivated and linked to the new edge through a
/// supersession edge carrying `reason`. Applying the same override again
/// supersedes the previous override, so the history stays a chain.
pub fn apply_override(
    graph: &mut LineageGraph,
    concept: &str,
    period: &str,
    new_source: NodeId,
    reason: &str,
) -> LineageResult<EdgeId> {
    if reason.trim().is_empty() {
        return Err(LineageError::violation("override reason is empty"));
    }
    let source_value = graph.node(new_source)?.value;
    let slot = locate_slot(graph, concept, period)?;
    let slot_node = graph.node(slot)?;
    if slot_node.value != source_value {
        return Err(LineageError::violation(format!(
            "override source holds {:?} but the slot holds {:?}; record a corrected value as a new fact instead",
            source_value, slot_node.value
        ))
        .with_nodes([new_source, slot]));
    }
    let kind = override_kind(slot_node.kind)?;

    let spec = EdgeSpec::new(kind, vec![new_source], slot, METHOD).condition(reason);
    let (new, previous) = graph.replace_producer(spec, reason)?;

    info!(
        concept,
        period,
        slot = %slot,
        edge = %new,
        superseded = ?previous,
        reason,
        "override applied"
    );
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NodeSpec, OriginKey};
    use std::collections::BTreeSet;

    struct Fixture {
        graph: LineageGraph,
        cell: NodeId,
        mapped: NodeId,
        keyword_edge: EdgeId,
        user_cell: NodeId,
    }

    fn keyword_mapped() -> Fixture {
        let mut g = LineageGraph::new("s");
        let cell = g.add_node(NodeSpec::source_cell(OriginKey::new("IS", 4, 2), Some(80.0))).unwrap();
        let ext = g.add_node(NodeSpec::new(NodeKind::Extracted).period("FY2024").value(80.0)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![cell], ext, "spreadsheet_extraction")).unwrap();
        let mapped = g
            .add_node(NodeSpec::new(NodeKind::Mapped).concept("EBITDA").period("FY2024").value(80.0))
            .unwrap();
        let keyword_edge = g
            .add_edge(EdgeSpec::new(EdgeKind::Mapping { tier: MappingTier::KeywordMatch }, vec![ext], mapped, "keyword"))
            .unwrap();
        let user_cell = g.add_node(NodeSpec::source_cell(OriginKey::new("user", 1, 1), Some(80.0))).unwrap();
        Fixture { graph: g, cell, mapped, keyword_edge, user_cell }
    }

    #[test]
    fn test_override_replaces_keyword_mapping() {
        let Fixture { mut graph, cell, mapped, keyword_edge, user_cell } = keyword_mapped();
        assert_eq!(graph.node(mapped).unwrap().confidence, 0.70);

        let new = apply_override(&mut graph, "EBITDA", "FY2024", user_cell, "analyst confirmed").unwrap();

        assert!(!graph.edge(keyword_edge).unwrap().active);
        let edge = graph.edge(new).unwrap();
        assert!(edge.active && edge.is_user_override());
        assert_eq!(edge.confidence, 1.0);
        assert_eq!(graph.node(mapped).unwrap().confidence, 1.0);

        let all: BTreeSet<NodeId> = graph.trace_backward(mapped, false).unwrap();
        assert!(all.contains(&cell));
        let active = graph.trace_backward(mapped, true).unwrap();
        assert!(!active.contains(&cell));
        assert!(active.contains(&user_cell));
    }

    #[test]
    fn test_repeated_override_chains_supersessions() {
        let Fixture { mut graph, mapped, keyword_edge, user_cell, .. } = keyword_mapped();
        let first = apply_override(&mut graph, "EBITDA", "FY2024", user_cell, "analyst confirmed").unwrap();
        let second = apply_override(&mut graph, "EBITDA", "FY2024", user_cell, "analyst confirmed").unwrap();

        assert_eq!(graph.incoming_edges(mapped, true).unwrap().len(), 1);
        assert_eq!(graph.active_producer(mapped).unwrap().map(|e| e.id), Some(second));

        let chain = graph.supersession_chain(mapped).unwrap();
        let links: Vec<_> = chain.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            links,
            vec![
                EdgeKind::Supersession { superseded: keyword_edge, replacement: first },
                EdgeKind::Supersession { superseded: first, replacement: second },
            ]
        );
        assert!(chain.iter().all(|e| !e.active && e.condition.as_deref() == Some("analyst confirmed")));
    }

    #[test]
    fn test_missing_slot_and_bad_source_leave_graph_untouched() {
        let Fixture { mut graph, user_cell, .. } = keyword_mapped();
        let before = graph.edge_count();

        let err = apply_override(&mut graph, "Capex", "FY2024", user_cell, "fix").unwrap_err();
        assert!(matches!(err, LineageError::SlotNotFound { .. }));

        let err = apply_override(&mut graph, "EBITDA", "FY2024", NodeId(99), "fix").unwrap_err();
        assert_eq!(err, LineageError::NodeNotFound(NodeId(99)));
        assert_eq!(graph.edge_count(), before);
    }

    #[test]
    fn test_override_that_would_close_a_cycle_is_rejected() {
        let Fixture { mut graph, mapped, keyword_edge, .. } = keyword_mapped();
        let err = apply_override(&mut graph, "EBITDA", "FY2024", mapped, "self").unwrap_err();
        assert!(matches!(err, LineageError::LineageViolation { .. }));
        assert!(graph.edge(keyword_edge).unwrap().active);
    }

    #[test]
    fn test_override_with_different_value_is_rejected() {
        let Fixture { mut graph, mapped, keyword_edge, .. } = keyword_mapped();
        let other = graph.add_node(NodeSpec::source_cell(OriginKey::new("user", 2, 1), Some(85.0))).unwrap();
        let edges_before = graph.edge_count();

        let err = apply_override(&mut graph, "EBITDA", "FY2024", other, "restated").unwrap_err();
        let LineageError::LineageViolation { nodes, .. } = err else {
            panic!("Wrong error: {:?}", err);
        };
        assert_eq!(nodes, vec![other, mapped]);
        assert_eq!(graph.edge_count(), edges_before);
        assert!(graph.edge(keyword_edge).unwrap().active);
        assert_eq!(graph.node(mapped).unwrap().confidence, 0.70);
    }

    #[test]
    fn test_ambiguous_mapped_slot() {
        let Fixture { mut graph, user_cell, .. } = keyword_mapped();
        graph
            .add_node(NodeSpec::new(NodeKind::Mapped).concept("EBITDA").period("FY2024").value(1.0))
            .unwrap();
        let err = apply_override(&mut graph, "EBITDA", "FY2024", user_cell, "fix").unwrap_err();
        assert!(matches!(err, LineageError::LineageViolation { .. }));
    }
}
