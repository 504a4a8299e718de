//! Hierarchy-aware aggregation of the mapped candidates for one
//! `(concept, period)` slot.
//!
//! Totals win over components. Several totals that agree collapse to the first
//! one; totals that disagree fall back to the largest, which is logged since
//! it is a policy choice rather than an accounting rule.

use crate::config::DEFAULT_TOTAL_DISAGREEMENT_TOLERANCE;
use crate::error::{LineageError, LineageResult};
use crate::store::{
    AggregationStrategy, EdgeId, EdgeKind, EdgeSpec, Exclusion, LineageGraph, Node, NodeId, NodeKind,
    NodeSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub const REASON_ZERO_CONFIDENCE: &str = "zero confidence: absent or unresolved";
pub const REASON_SUPERSEDED_BY_TOTAL: &str = "superseded by detected total line";
pub const REASON_TOTAL_DISAGREES: &str = "total line disagrees with selected maximum";

const METHOD: &str = "hierarchy_aware_aggregation";

/// One mapped node offered to the resolver, with the classifier's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub node_id: NodeId,
    pub is_total_line: bool,
}

impl Candidate {
    pub fn total(node_id: NodeId) -> Self { Self { node_id, is_total_line: true } }
    pub fn component(node_id: NodeId) -> Self { Self { node_id, is_total_line: false } }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationOutcome {
    pub node_id: NodeId,
    pub edge_id: EdgeId,
    pub strategy: AggregationStrategy,
    pub value: f64,
    pub confidence: f64,
    /// Inactive edges recording each rejected candidate, in input order.
    pub rejected_edges: Vec<EdgeId>,
}

struct Plan {
    strategy: AggregationStrategy,
    contributors: Vec<NodeId>,
    value: f64,
    excluded: Vec<Exclusion>,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregationResolver {
    tolerance: f64,
}

impl Default for AggregationResolver {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOTAL_DISAGREEMENT_TOLERANCE }
    }
}

impl AggregationResolver {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Resolves the slot and records the decision in `graph`.
    ///
    /// Returns `Ok(None)` when no candidate carries a trusted value; the slot
    /// then stays at confidence 0 and nothing is written.
    pub fn resolve(
        &self,
        graph: &mut LineageGraph,
        concept: &str,
        period: &str,
        candidates: &[Candidate],
    ) -> LineageResult<Option<AggregationOutcome>> {
        self.validate(graph, concept, period, candidates)?;

        let Some(plan) = self.plan(graph, candidates) else {
            if !candidates.is_empty() {
                warn!(concept, period, candidates = candidates.len(), "no usable candidate, slot left empty");
            }
            return Ok(None);
        };

        let node_id = graph.add_node(
            NodeSpec::new(NodeKind::Aggregated).concept(concept).period(period).value(plan.value),
        )?;
        let edge_id = graph.add_edge(EdgeSpec::new(
            EdgeKind::Aggregation { strategy: plan.strategy, excluded: plan.excluded.clone() },
            plan.contributors.clone(),
            node_id,
            METHOD,
        ))?;

        let mut rejected_edges = Vec::with_capacity(plan.excluded.len());
        for exclusion in &plan.excluded {
            let spec = EdgeSpec::new(
                EdgeKind::Aggregation { strategy: plan.strategy, excluded: Vec::new() },
                vec![exclusion.node_id],
                node_id,
                METHOD,
            )
            .inactive(exclusion.reason.clone());
            rejected_edges.push(graph.add_edge(spec)?);
        }

        let confidence = graph.node(node_id)?.confidence;
        info!(
            concept,
            period,
            strategy = plan.strategy.as_str(),
            value = plan.value,
            confidence,
            rejected = rejected_edges.len(),
            "slot aggregated"
        );
        Ok(Some(AggregationOutcome {
            node_id,
            edge_id,
            strategy: plan.strategy,
            value: plan.value,
            confidence,
            rejected_edges,
        }))
    }

    fn validate(
        &self,
        graph: &LineageGraph,
        concept: &str,
        period: &str,
        candidates: &[Candidate],
    ) -> LineageResult<()> {
        let mut seen = HashSet::new();
        for c in candidates {
            let node = graph.node(c.node_id)?;
            if node.kind != NodeKind::Mapped {
                return Err(LineageError::violation(format!(
                    "aggregation candidate must be a mapped node, got {}",
                    node.kind.as_str()
                ))
                .with_nodes([node.id]));
            }
            if node.concept.as_deref() != Some(concept) || node.period.as_deref() != Some(period) {
                return Err(LineageError::violation(format!(
                    "candidate does not belong to slot ({concept}, {period})"
                ))
                .with_nodes([node.id]));
            }
            if !seen.insert(c.node_id) {
                return Err(LineageError::violation("candidate listed twice").with_nodes([node.id]));
            }
        }

        let existing: Vec<NodeId> = graph
            .query_by_concept(concept, Some(period))
            .into_iter()
            .filter(|n| n.kind == NodeKind::Aggregated && n.active)
            .map(|n| n.id)
            .collect();
        if !existing.is_empty() {
            return Err(LineageError::violation(format!(
                "slot ({concept}, {period}) is already aggregated"
            ))
            .with_nodes(existing));
        }
        Ok(())
    }

    fn plan(&self, graph: &LineageGraph, candidates: &[Candidate]) -> Option<Plan> {
        let nodes: Vec<(&Candidate, &Node)> = candidates
            .iter()
            .filter_map(|c| graph.node(c.node_id).ok().map(|n| (c, n)))
            .collect();

        let usable = |n: &Node| n.value.is_some() && n.confidence > 0.0;
        for (_, node) in nodes.iter().filter(|(_, n)| !usable(n)) {
            warn!(node = %node.id, label = %node.display_name(), "candidate rejected: {}", REASON_ZERO_CONFIDENCE);
        }

        let totals: Vec<&Node> = nodes.iter().filter(|(c, n)| c.is_total_line && usable(n)).map(|(_, n)| *n).collect();
        let components: Vec<&Node> = nodes.iter().filter(|(c, n)| !c.is_total_line && usable(n)).map(|(_, n)| *n).collect();

        let (strategy, contributors): (AggregationStrategy, Vec<&Node>) = if !totals.is_empty() {
            if self.totals_disagree(&totals) {
                let chosen = max_by_value(&totals)?;
                warn!(
                    node = %chosen.id,
                    totals = totals.len(),
                    "total lines disagree, taking the maximum"
                );
                (AggregationStrategy::MaxValueTieBreak, vec![chosen])
            } else {
                (AggregationStrategy::TotalLineUsed, vec![totals[0]])
            }
        } else if components.len() == 1 {
            (AggregationStrategy::SingleValue, components)
        } else if !components.is_empty() {
            (AggregationStrategy::ComponentSum, components)
        } else {
            return None;
        };

        let mut values: Vec<f64> = contributors.iter().filter_map(|n| n.value).collect();
        values.sort_by(f64::total_cmp);
        let value: f64 = values.iter().sum();

        let chosen: HashSet<NodeId> = contributors.iter().map(|n| n.id).collect();
        let excluded: Vec<Exclusion> = nodes
            .iter()
            .filter(|(_, n)| !chosen.contains(&n.id))
            .map(|(c, n)| {
                let reason = if !usable(n) {
                    REASON_ZERO_CONFIDENCE
                } else if c.is_total_line && strategy == AggregationStrategy::MaxValueTieBreak {
                    REASON_TOTAL_DISAGREES
                } else {
                    REASON_SUPERSEDED_BY_TOTAL
                };
                Exclusion { node_id: n.id, reason: reason.to_string() }
            })
            .collect();

        Some(Plan {
            strategy,
            contributors: contributors.iter().map(|n| n.id).collect(),
            value,
            excluded,
        })
    }

    fn totals_disagree(&self, totals: &[&Node]) -> bool {
        let values: Vec<f64> = totals.iter().filter_map(|n| n.value).collect();
        values
            .iter()
            .enumerate()
            .any(|(i, &a)| values[i + 1..].iter().any(|&b| relative_difference(a, b) > self.tolerance))
    }
}

/// `|a - b| / max(|a|, |b|)`, zero when both are zero.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

/// First node holding the largest value.
fn max_by_value<'n>(nodes: &[&'n Node]) -> Option<&'n Node> {
    let mut best: Option<&Node> = None;
    for &node in nodes {
        let v = node.value.unwrap_or(f64::NEG_INFINITY);
        if best.map_or(true, |b| v > b.value.unwrap_or(f64::NEG_INFINITY)) {
            best = Some(node);
        }
    }
    best
}
