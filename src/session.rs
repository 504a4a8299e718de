//! The per-upload pipeline: extraction feeds mapping feeds aggregation feeds
//! calculation, all recorded in one session-owned graph.
//!
//! Sessions share nothing. [`run_isolated`] processes independent batches in
//! parallel, one graph per batch.

use crate::confidence::{BlockingReport, BlockingRuleChecker};
use crate::config::LineageConfig;
use crate::display::{self, Explanation};
use crate::error::{ConfigError, LineageError, LineageResult};
use crate::resolve::{self, AggregationOutcome, AggregationResolver, Candidate};
use crate::store::{
    EdgeId, EdgeKind, EdgeSpec, FormulaComplexity, LineageGraph, MappingTier, NodeId, NodeKind, NodeSpec,
    OriginKey,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const EXTRACTION_METHOD: &str = "spreadsheet_extraction";

/// A raw line item as read from the spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub label: String,
    /// `None` for a blank or non-numeric cell.
    pub amount: Option<f64>,
    pub period: String,
    pub origin: OriginKey,
}

/// The mapper's verdict for one item. `concept == None` means unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub concept: Option<String>,
    pub tier: MappingTier,
}

impl Resolution {
    pub fn mapped(concept: impl Into<String>, tier: MappingTier) -> Self {
        Self { concept: Some(concept.into()), tier }
    }

    pub fn unresolved() -> Self {
        Self { concept: None, tier: MappingTier::Unresolved }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub cell: NodeId,
    pub extracted: NodeId,
    pub mapped: Option<NodeId>,
}

/// A derived metric. The formula is descriptive; the caller supplies the
/// computed value.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationSpec {
    pub concept: String,
    pub period: String,
    pub formula: String,
    /// Inferred from `formula` when absent.
    pub complexity: Option<FormulaComplexity>,
    pub inputs: Vec<NodeId>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalculationOutcome {
    pub node_id: NodeId,
    pub edge_id: EdgeId,
    pub value: Option<f64>,
    pub confidence: f64,
}

/// What downstream model builders see for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedValue {
    pub node_id: Option<NodeId>,
    pub value: Option<f64>,
    pub confidence: f64,
}

impl ResolvedValue {
    pub const ABSENT: ResolvedValue = ResolvedValue { node_id: None, value: None, confidence: 0.0 };
}

/// Ties a model input label (e.g. `"Capex"`) to the slot that feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    pub label: String,
    pub concept: String,
    pub period: String,
}

impl InputBinding {
    pub fn new(label: impl Into<String>, concept: impl Into<String>, period: impl Into<String>) -> Self {
        Self { label: label.into(), concept: concept.into(), period: period.into() }
    }
}

#[derive(Debug)]
pub struct Session {
    graph: LineageGraph,
    resolver: AggregationResolver,
    checker: BlockingRuleChecker,
}

impl Session {
    pub fn new(session_id: impl Into<String>, config: LineageConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(session_id.into(), config))
    }

    fn from_valid(session_id: String, config: LineageConfig) -> Self {
        Self {
            graph: LineageGraph::new(session_id),
            resolver: AggregationResolver::new(config.resolver.total_disagreement_tolerance),
            checker: BlockingRuleChecker::from_validated(config.blocking),
        }
    }

    pub fn graph(&self) -> &LineageGraph { &self.graph }
    pub fn into_graph(self) -> LineageGraph { self.graph }

    /// Records a raw item: its cell, the extracted fact and, when the mapper
    /// resolved a concept, the mapped fact scored by tier.
    pub fn ingest(&mut self, item: &SourceItem, resolution: &Resolution) -> LineageResult<IngestOutcome> {
        let cell = self
            .graph
            .add_node(NodeSpec::source_cell(item.origin.clone(), item.amount).label(item.label.clone()))?;
        let extracted = self.graph.add_node(
            NodeSpec::new(NodeKind::Extracted)
                .period(item.period.clone())
                .label(item.label.clone())
                .maybe_value(item.amount),
        )?;
        self.graph
            .add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![cell], extracted, EXTRACTION_METHOD))?;

        let mapped = match &resolution.concept {
            Some(concept) => {
                let id = self.graph.add_node(
                    NodeSpec::new(NodeKind::Mapped)
                        .concept(concept.clone())
                        .period(item.period.clone())
                        .label(item.label.clone())
                        .maybe_value(item.amount),
                )?;
                let spec = EdgeSpec::new(
                    EdgeKind::Mapping { tier: resolution.tier },
                    vec![extracted],
                    id,
                    resolution.tier.as_str(),
                );
                self.graph.add_edge(spec)?;
                Some(id)
            }
            None => {
                debug!(label = %item.label, origin = %item.origin, "item left unmapped");
                None
            }
        };
        Ok(IngestOutcome { cell, extracted, mapped })
    }

    pub fn aggregate(
        &mut self,
        concept: &str,
        period: &str,
        candidates: &[Candidate],
    ) -> LineageResult<Option<AggregationOutcome>> {
        self.resolver.resolve(&mut self.graph, concept, period, candidates)
    }

    /// Records a calculation. When an input carries no trusted value the
    /// result is recorded as absent rather than derived from a guess.
    pub fn calculate(&mut self, spec: CalculationSpec) -> LineageResult<CalculationOutcome> {
        // Everything the edge check could reject is settled before the node exists.
        if spec.inputs.is_empty() {
            return Err(LineageError::violation(format!(
                "calculation of ({}, {}) has no inputs",
                spec.concept, spec.period
            )));
        }
        let mut untrusted = Vec::new();
        for &input in &spec.inputs {
            let node = self.graph.node(input)?;
            if node.value.is_none() || node.confidence <= 0.0 {
                untrusted.push(input);
            }
        }
        let value = if untrusted.is_empty() {
            spec.value
        } else {
            warn!(
                concept = %spec.concept,
                period = %spec.period,
                inputs = ?untrusted,
                "calculation input has no trusted value, result left absent"
            );
            None
        };

        let complexity = spec.complexity.unwrap_or_else(|| FormulaComplexity::infer(&spec.formula));
        let node_id = self.graph.add_node(
            NodeSpec::new(NodeKind::Calculated)
                .concept(spec.concept)
                .period(spec.period)
                .maybe_value(value),
        )?;
        let edge_id = self.graph.add_edge(EdgeSpec::new(
            EdgeKind::Calculation { formula: spec.formula, complexity },
            spec.inputs,
            node_id,
            "formula",
        ))?;
        let confidence = self.graph.node(node_id)?.confidence;
        Ok(CalculationOutcome { node_id, edge_id, value, confidence })
    }

    pub fn apply_override(
        &mut self,
        concept: &str,
        period: &str,
        new_source: NodeId,
        reason: &str,
    ) -> LineageResult<EdgeId> {
        resolve::apply_override(&mut self.graph, concept, period, new_source, reason)
    }

    /// The value a downstream model may use for `(concept, period)`: the
    /// latest active calculated node, else the active aggregated node.
    /// Absent or untrusted slots read as no value at confidence 0.
    pub fn resolved(&self, concept: &str, period: &str) -> ResolvedValue {
        let nodes = self.graph.query_by_concept(concept, Some(period));
        let pick = |kind: NodeKind| nodes.iter().rev().find(|n| n.kind == kind && n.active);
        let Some(node) = pick(NodeKind::Calculated).or_else(|| pick(NodeKind::Aggregated)) else {
            return ResolvedValue::ABSENT;
        };
        if node.value.is_none() || node.confidence <= 0.0 {
            return ResolvedValue { node_id: Some(node.id), value: None, confidence: 0.0 };
        }
        ResolvedValue { node_id: Some(node.id), value: node.value, confidence: node.confidence }
    }

    pub fn critical_inputs(&self, bindings: &[InputBinding]) -> BTreeMap<String, f64> {
        bindings
            .iter()
            .map(|b| (b.label.clone(), self.resolved(&b.concept, &b.period).confidence))
            .collect()
    }

    pub fn check(&self, model: &str, bindings: &[InputBinding]) -> Result<BlockingReport, ConfigError> {
        self.checker.check(model, &self.critical_inputs(bindings))
    }

    pub fn explain(&self, node: NodeId) -> LineageResult<Explanation> {
        display::explain(&self.graph, node)
    }

    pub fn trace(&self, node: NodeId) -> String {
        display::format_trace(&self.graph, node)
    }
}

/// Runs every batch in its own session, in parallel. Results come back in
/// batch order.
pub fn run_isolated<B, T, F>(
    config: &LineageConfig,
    batches: Vec<(String, B)>,
    process: F,
) -> Result<Vec<T>, ConfigError>
where
    B: Send,
    T: Send,
    F: Fn(Session, B) -> T + Sync,
{
    config.validate()?;
    Ok(batches
        .into_par_iter()
        .map(|(session_id, batch)| process(Session::from_valid(session_id, config.clone()), batch))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn item(row: u32, label: &str, amount: Option<f64>) -> SourceItem {
        SourceItem {
            label: label.to_string(),
            amount,
            period: "FY2024".to_string(),
            origin: OriginKey::new("IS", row, 2),
        }
    }

    fn session() -> Session {
        Session::new("s", LineageConfig::default()).unwrap()
    }

    #[test]
    fn test_ingest_builds_three_stages() {
        let mut s = session();
        let out = s
            .ingest(&item(1, "Net sales", Some(100.0)), &Resolution::mapped("Revenue", MappingTier::ExactMatch))
            .unwrap();
        let g = s.graph();
        assert_eq!(g.node(out.cell).unwrap().kind, NodeKind::SourceCell);
        assert_eq!(g.node(out.extracted).unwrap().confidence, 1.0);
        let mapped = out.mapped.unwrap();
        assert_abs_diff_eq!(g.node(mapped).unwrap().confidence, 0.90);
        assert_eq!(g.active_producer(out.extracted).unwrap().unwrap().method, EXTRACTION_METHOD);
    }

    #[test]
    fn test_unresolved_item_stops_at_extraction() {
        let mut s = session();
        let out = s.ingest(&item(1, "Sundry", Some(3.0)), &Resolution::unresolved()).unwrap();
        assert!(out.mapped.is_none());
        assert_eq!(s.graph().node_count(), 2);
    }

    #[test]
    fn test_calculation_with_untrusted_input_is_absent() {
        let mut s = session();
        let blank = s
            .ingest(&item(1, "Capex", None), &Resolution::mapped("Capex", MappingTier::ExactMatch))
            .unwrap()
            .mapped
            .unwrap();
        let out = s
            .calculate(CalculationSpec {
                concept: "FCF".into(),
                period: "FY2024".into(),
                formula: "EBITDA - Capex".into(),
                complexity: None,
                inputs: vec![blank],
                value: Some(10.0),
            })
            .unwrap();
        assert_eq!(out.value, None);
        assert_eq!(out.confidence, 0.0);
        assert_eq!(s.resolved("FCF", "FY2024").value, None);
    }

    #[test]
    fn test_rejected_calculation_leaves_graph_untouched() {
        let mut s = session();
        let calc = |inputs: Vec<NodeId>| CalculationSpec {
            concept: "FCF".into(),
            period: "FY2024".into(),
            formula: "EBITDA - Capex".into(),
            complexity: None,
            inputs,
            value: Some(10.0),
        };

        let err = s.calculate(calc(vec![])).unwrap_err();
        assert!(matches!(err, LineageError::LineageViolation { .. }));
        let err = s.calculate(calc(vec![NodeId(42)])).unwrap_err();
        assert_eq!(err, LineageError::NodeNotFound(NodeId(42)));

        assert_eq!(s.graph().node_count(), 0);
        assert_eq!(s.graph().edge_count(), 0);
        assert!(s.graph().query_by_concept("FCF", None).is_empty());
        assert!(s.graph().query_by_kind(NodeKind::Calculated).is_empty());
    }

    #[test]
    fn test_calculation_infers_complexity() {
        let mut s = session();
        let rev = s
            .ingest(&item(1, "Revenue", Some(100.0)), &Resolution::mapped("Revenue", MappingTier::ExactMatch))
            .unwrap()
            .mapped
            .unwrap();
        let agg = s.aggregate("Revenue", "FY2024", &[Candidate::component(rev)]).unwrap().unwrap();
        let out = s
            .calculate(CalculationSpec {
                concept: "Margin".into(),
                period: "FY2024".into(),
                formula: "EBITDA / Revenue".into(),
                complexity: None,
                inputs: vec![agg.node_id],
                value: Some(0.2),
            })
            .unwrap();
        assert_abs_diff_eq!(out.confidence, 0.90 * 0.90 * 0.98, epsilon = 1e-12);
        assert_eq!(s.resolved("Margin", "FY2024").node_id, Some(out.node_id));
    }

    #[test]
    fn test_resolved_absent_slot() {
        let s = session();
        assert_eq!(s.resolved("CapEx", "FY2024"), ResolvedValue::ABSENT);
    }

    #[test]
    fn test_run_isolated_keeps_sessions_apart() {
        let batches = vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)];
        let graphs = run_isolated(&LineageConfig::default(), batches, |mut s, amount| {
            s.ingest(&item(1, "Cash", Some(amount)), &Resolution::mapped("Cash", MappingTier::ExactMatch))
                .unwrap();
            s.into_graph()
        })
        .unwrap();
        assert_eq!(graphs[0].session_id(), "a");
        assert_eq!(graphs[1].node_count(), 3);
        assert_eq!(graphs[1].nodes().last().unwrap().value, Some(2.0));
    }
}
