//! "Why this number": a structured account of how a value was produced, what
//! it rests on and what was considered but not used.

use crate::confidence::ConfidenceLevel;
use crate::error::LineageResult;
use crate::store::{Edge, EdgeId, EdgeKind, LineageGraph, NodeId, NodeKind, OriginKey};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write;

/// One node of the active lineage together with the edge that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationStep {
    pub node_id: NodeId,
    pub node_kind: NodeKind,
    pub name: String,
    pub value: Option<f64>,
    pub confidence: f64,
    /// `None` for source cells.
    pub edge_id: Option<EdgeId>,
    pub transformation: Option<&'static str>,
    pub method: Option<String>,
    pub scoring: Option<String>,
}

/// An inactive edge into a node of the lineage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    pub edge_id: EdgeId,
    pub target: NodeId,
    pub sources: Vec<NodeId>,
    pub transformation: &'static str,
    pub confidence: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub node_id: NodeId,
    pub name: String,
    pub concept: Option<String>,
    pub period: Option<String>,
    pub value: Option<f64>,
    pub confidence: f64,
    pub level: ConfidenceLevel,
    /// Source cells first, the explained node last.
    pub steps: Vec<ExplanationStep>,
    pub alternatives: Vec<Alternative>,
    pub origins: Vec<OriginKey>,
    pub summary: String,
}

impl Explanation {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.summary);
        let _ = writeln!(out, "Steps:");
        for (i, step) in self.steps.iter().enumerate() {
            let value = step.value.map_or_else(|| "absent".to_string(), |v| format!("{:.2}", v));
            match (&step.transformation, &step.scoring) {
                (Some(t), Some(s)) => {
                    let _ = writeln!(out, "  {}. {} [{}] via {}: {}", i + 1, step.name, value, t, s);
                }
                _ => {
                    let _ = writeln!(out, "  {}. {} [{}] {}", i + 1, step.name, value, step.node_kind.as_str());
                }
            }
        }
        if !self.alternatives.is_empty() {
            let _ = writeln!(out, "Alternatives not used:");
            for alt in &self.alternatives {
                let _ = writeln!(
                    out,
                    "  - {} {} into {}: {}",
                    alt.edge_id,
                    alt.transformation,
                    alt.target,
                    alt.reason.as_deref().unwrap_or("inactive")
                );
            }
        }
        out
    }
}

pub fn explain(graph: &LineageGraph, id: NodeId) -> LineageResult<Explanation> {
    let node = graph.node(id)?;

    let order = active_lineage(graph, id)?;
    let mut steps = Vec::with_capacity(order.len());
    let mut alternatives = Vec::new();
    for &step_id in &order {
        let step_node = graph.node(step_id)?;
        let producer = graph.active_producer(step_id)?;
        steps.push(ExplanationStep {
            node_id: step_id,
            node_kind: step_node.kind,
            name: step_node.display_name(),
            value: step_node.value,
            confidence: step_node.confidence,
            edge_id: producer.map(|e| e.id),
            transformation: producer.map(|e| e.kind.as_str()),
            method: producer.map(|e| e.method.clone()),
            scoring: producer.map(|e| e.scoring.explain()),
        });

        for edge in graph.incoming_edges(step_id, false)?.into_iter().filter(|e| !e.active) {
            alternatives.push(Alternative {
                edge_id: edge.id,
                target: step_id,
                sources: edge.source_ids.to_vec(),
                transformation: edge.kind.as_str(),
                confidence: edge.confidence,
                reason: rejection_reason(graph, edge)?,
            });
        }
    }

    let origins = trace_to_source(graph, id)?;
    let level = ConfidenceLevel::of(node.confidence);
    let name = node.display_name();
    let summary = summarize(&name, node.period.as_deref(), node.value, node.confidence, level, &steps, &origins, alternatives.len());

    Ok(Explanation {
        node_id: id,
        name,
        concept: node.concept.clone(),
        period: node.period.clone(),
        value: node.value,
        confidence: node.confidence,
        level,
        steps,
        alternatives,
        origins,
        summary,
    })
}

/// Spreadsheet cells the value rests on through active edges, by node id.
pub fn trace_to_source(graph: &LineageGraph, id: NodeId) -> LineageResult<Vec<OriginKey>> {
    let node = graph.node(id)?;
    let mut cells: Vec<NodeId> = graph.trace_backward(id, true)?.into_iter().collect();
    if node.kind == NodeKind::SourceCell {
        cells.insert(0, id);
    }
    let mut origins = Vec::new();
    for cell in cells {
        let n = graph.node(cell)?;
        if let (NodeKind::SourceCell, Some(origin)) = (n.kind, &n.origin) {
            origins.push(origin.clone());
        }
    }
    Ok(origins)
}

/// Active ancestors of `id` plus `id`, every node after all of its sources.
fn active_lineage(graph: &LineageGraph, id: NodeId) -> LineageResult<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    // (node, sources already pushed)
    let mut stack = vec![(id, false)];
    while let Some((current, expanded)) = stack.pop() {
        if expanded {
            order.push(current);
            continue;
        }
        if !seen.insert(current) {
            continue;
        }
        stack.push((current, true));
        if let Some(edge) = graph.active_producer(current)? {
            for &source in edge.source_ids.iter().rev() {
                if !seen.contains(&source) {
                    stack.push((source, false));
                }
            }
        }
    }
    Ok(order)
}

fn rejection_reason(graph: &LineageGraph, edge: &Edge) -> LineageResult<Option<String>> {
    if edge.condition.is_some() {
        return Ok(edge.condition.clone());
    }
    let superseded_by = graph.supersession_chain(edge.target_id)?.into_iter().find_map(|link| match &link.kind {
        EdgeKind::Supersession { superseded, replacement } if *superseded == edge.id => {
            Some(format!("superseded by {}: {}", replacement, link.condition.as_deref().unwrap_or("override")))
        }
        _ => None,
    });
    Ok(superseded_by)
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    name: &str,
    period: Option<&str>,
    value: Option<f64>,
    confidence: f64,
    level: ConfidenceLevel,
    steps: &[ExplanationStep],
    origins: &[OriginKey],
    rejected: usize,
) -> String {
    let slot = match period {
        Some(p) => format!("{name} ({p})"),
        None => name.to_string(),
    };
    let Some(value) = value.filter(|_| confidence > 0.0) else {
        return format!("{slot} has no trusted value (confidence 0.00)");
    };

    let via = steps.last().and_then(|s| s.transformation).unwrap_or("source cell");
    let cells = origins.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(", ");
    let mut summary = format!(
        "{slot} = {value:.2} at confidence {confidence:.2} ({}) via {via}, from {} source cell(s) [{cells}]",
        level.label(),
        origins.len()
    );
    if rejected > 0 {
        let _ = write!(summary, "; {rejected} alternative(s) not used");
    }
    summary
}
