//! registry.rs
//! Arena storage for lineage nodes and edges with linked-list adjacency and
//! lookup indexes.

use super::types::*;
use crate::analysis::topology;
use crate::confidence::{self, Scoring, MONOTONICITY_TOLERANCE};
use crate::error::{LineageError, LineageResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

const NIL: u32 = u32::MAX;

/// Singly linked edge lists threaded through flat arrays.
/// Heads are per node; entries are prepended, so iteration runs newest first.
#[derive(Debug, Clone, Default)]
struct LinkTable {
    first: Vec<u32>,
    edges: Vec<EdgeId>,
    next: Vec<u32>,
}

impl LinkTable {
    fn push_node(&mut self) { self.first.push(NIL); }

    fn link(&mut self, node: NodeId, edge: EdgeId) {
        let n_idx = node.index();
        let head = self.first[n_idx];
        let entry = self.edges.len() as u32;
        self.edges.push(edge);
        self.next.push(head);
        self.first[n_idx] = entry;
    }

    fn iter(&self, node: NodeId) -> LinkIter<'_> {
        LinkIter { table: self, cursor: self.first[node.index()] }
    }
}

struct LinkIter<'a> {
    table: &'a LinkTable,
    cursor: u32,
}

impl<'a> Iterator for LinkIter<'a> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        if self.cursor == NIL {
            return None;
        }
        let idx = self.cursor as usize;
        self.cursor = self.table.next[idx];
        Some(self.table.edges[idx])
    }
}

/// One hop of a path: the node and the edge leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathStep {
    pub node: NodeId,
    pub edge: EdgeId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub active_edges: usize,
    pub inactive_edges: usize,
    pub nodes_by_kind: BTreeMap<&'static str, usize>,
    pub edges_by_kind: BTreeMap<&'static str, usize>,
    pub mapping_tiers: BTreeMap<&'static str, usize>,
    pub aggregation_strategies: BTreeMap<&'static str, usize>,
    /// Mean confidence over active edges.
    pub average_confidence: f64,
}

/// The provenance graph of one processing session.
#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    session_id: String,

    // Arenas
    nodes: Vec<Node>,
    edges: Vec<Edge>,

    // Topology
    outgoing: LinkTable,
    incoming: LinkTable,
    active_in: Vec<Option<EdgeId>>,
    supersessions: Vec<EdgeId>,

    // Indexes (creation order inside every bucket)
    by_kind: HashMap<NodeKind, Vec<NodeId>>,
    by_concept: HashMap<String, Vec<NodeId>>,
    by_slot: HashMap<(String, String), Vec<NodeId>>,
    by_cell: HashMap<OriginKey, Vec<NodeId>>,
}

impl LineageGraph {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Self::default() }
    }

    pub fn session_id(&self) -> &str { &self.session_id }
    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.edges.len() }
    pub fn active_edge_count(&self) -> usize { self.edges.iter().filter(|e| e.active).count() }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> { self.nodes.iter() }
    pub fn edges(&self) -> impl Iterator<Item = &Edge> { self.edges.iter() }

    // --- Construction ---

    pub fn add_node(&mut self, spec: NodeSpec) -> LineageResult<NodeId> {
        if spec.origin.is_some() && spec.kind != NodeKind::SourceCell {
            return Err(LineageError::violation(format!(
                "only source cells carry an origin, got a {} node",
                spec.kind.as_str()
            )));
        }
        if spec.kind.requires_period() && spec.period.is_none() {
            return Err(LineageError::violation(format!(
                "a {} node requires a period",
                spec.kind.as_str()
            )));
        }
        if let Some(v) = spec.value {
            if !v.is_finite() {
                return Err(LineageError::violation(format!("node value {} is not finite", v)));
            }
        }

        let id = NodeId::new(self.nodes.len());
        let anchored = spec.kind == NodeKind::SourceCell;
        let confidence = if anchored && spec.value.is_some() { 1.0 } else { 0.0 };

        let node = Node {
            id,
            kind: spec.kind,
            concept: spec.concept,
            period: spec.period,
            label: spec.label,
            value: spec.value,
            confidence,
            active: anchored,
            origin: spec.origin,
        };
        self.index_node(&node);
        self.outgoing.push_node();
        self.incoming.push_node();
        self.active_in.push(None);

        debug!(node = %id, kind = node.kind.as_str(), "node added");
        self.nodes.push(node);
        Ok(id)
    }

    /// Adds a transformation edge.
    ///
    /// Never deactivates an existing producer: an active edge into a node that
    /// already has one is rejected. Switching producers belongs to the override
    /// manager.
    pub fn add_edge(&mut self, spec: EdgeSpec) -> LineageResult<EdgeId> {
        let scoring = self.check_edge(&spec, None)?;
        let id = self.commit_edge(spec, scoring);
        debug!(edge = %id, "edge added");
        Ok(id)
    }

    /// Validates `spec` without touching the graph and returns its scoring.
    /// `replacing` names an active producer that the caller is about to retire.
    fn check_edge(&self, spec: &EdgeSpec, replacing: Option<EdgeId>) -> LineageResult<Scoring> {
        if spec.kind.is_supersession() {
            return Err(LineageError::violation(
                "supersession edges are only created when a producer is replaced",
            ));
        }
        if spec.source_ids.is_empty() {
            return Err(LineageError::violation("edge has no sources").with_nodes([spec.target_id]));
        }
        if spec.method.trim().is_empty() {
            return Err(LineageError::violation("edge method is empty").with_nodes([spec.target_id]));
        }

        let target = self.node(spec.target_id)?;
        let sources = spec
            .source_ids
            .iter()
            .map(|&id| self.node(id))
            .collect::<LineageResult<Vec<_>>>()?;

        if target.kind == NodeKind::SourceCell {
            return Err(LineageError::violation("source cells cannot have a producer")
                .with_nodes([target.id]));
        }
        if spec.source_ids.contains(&spec.target_id) {
            return Err(LineageError::violation("edge would connect a node to itself")
                .with_nodes([target.id]));
        }

        if spec.active {
            if let Some(existing) = self.active_in[target.id.index()] {
                if Some(existing) != replacing {
                    return Err(LineageError::violation("target already has an active producer")
                        .with_nodes([target.id])
                        .with_edges([existing]));
                }
            }
            if topology::reaches_any(self, target.id, &spec.source_ids) {
                return Err(LineageError::violation("edge would create a cycle among active edges")
                    .with_nodes(spec.source_ids.iter().copied().chain([target.id])));
            }
            self.check_speculation(target, &sources)?;
        }

        let source_confidences: Vec<f64> = sources.iter().map(|n| n.confidence).collect();
        let scoring = confidence::score(&spec.kind, &source_confidences);
        self.check_scoring(target.id, None, &scoring)?;
        Ok(scoring)
    }

    /// A value-bearing target may only be derived from sources that are present
    /// and trusted.
    fn check_speculation(&self, target: &Node, sources: &[&Node]) -> LineageResult<()> {
        if target.value.is_none() {
            return Ok(());
        }
        let absent: Vec<NodeId> = sources
            .iter()
            .filter(|n| n.value.is_none() || n.confidence <= 0.0)
            .map(|n| n.id)
            .collect();
        if absent.is_empty() {
            Ok(())
        } else {
            Err(LineageError::SpeculationViolation {
                target: target.id,
                sources: absent,
                reason: "value derived from absent or zero-confidence input".into(),
            })
        }
    }

    fn check_scoring(&self, target: NodeId, edge: Option<EdgeId>, scoring: &Scoring) -> LineageResult<()> {
        let confidence = scoring.confidence();
        if !(0.0..=1.0).contains(&confidence) {
            return Err(LineageError::ConfidenceViolation { target, edge, confidence, bound: 1.0 });
        }
        if scoring.user_override {
            if confidence != 1.0 {
                return Err(LineageError::ConfidenceViolation { target, edge, confidence, bound: 1.0 });
            }
        } else if confidence > scoring.min_source + MONOTONICITY_TOLERANCE {
            return Err(LineageError::ConfidenceViolation {
                target,
                edge,
                confidence,
                bound: scoring.min_source,
            });
        }
        Ok(())
    }

    fn commit_edge(&mut self, spec: EdgeSpec, scoring: Scoring) -> EdgeId {
        let id = EdgeId::new(self.edges.len());
        let target = spec.target_id;
        let active = spec.active;

        for &source in &spec.source_ids {
            self.outgoing.link(source, id);
        }
        self.incoming.link(target, id);

        self.edges.push(Edge {
            id,
            kind: spec.kind,
            source_ids: spec.source_ids.into_iter().collect(),
            target_id: target,
            method: spec.method,
            confidence: scoring.confidence(),
            scoring,
            active,
            condition: spec.condition,
        });

        if active {
            self.active_in[target.index()] = Some(id);
            self.refresh_node(target);
        }
        id
    }

    /// Retires the active producer of `spec.target_id` (if any) in favour of a
    /// user-sanctioned edge at confidence 1.0 and links the two with a
    /// supersession edge carrying `reason`.
    ///
    /// Returns `(new_edge, previous_edge)`.
    pub(crate) fn replace_producer(
        &mut self,
        mut spec: EdgeSpec,
        reason: &str,
    ) -> LineageResult<(EdgeId, Option<EdgeId>)> {
        spec.active = true;
        let previous = self.active_in.get(spec.target_id.index()).copied().flatten();
        let scoring = self.check_edge(&spec, previous)?.into_user_override();
        self.check_scoring(spec.target_id, None, &scoring)?;

        let target = spec.target_id;
        if let Some(old) = previous {
            self.edges[old.index()].active = false;
            self.active_in[target.index()] = None;
        }
        let new = self.commit_edge(spec, scoring);

        if let Some(old) = previous {
            let link = EdgeId::new(self.edges.len());
            self.edges.push(Edge {
                id: link,
                kind: EdgeKind::Supersession { superseded: old, replacement: new },
                source_ids: std::iter::once(target).collect(),
                target_id: target,
                method: "supersession".into(),
                confidence: 0.0,
                scoring: Scoring::supersession(),
                active: false,
                condition: Some(reason.to_string()),
            });
            self.supersessions.push(link);
        }
        Ok((new, previous))
    }

    fn refresh_node(&mut self, id: NodeId) {
        let producer = self.active_in[id.index()];
        let producer_confidence = producer.map(|e| self.edges[e.index()].confidence);
        let node = &mut self.nodes[id.index()];
        match node.kind {
            NodeKind::SourceCell => {
                node.active = true;
                node.confidence = if node.value.is_some() { 1.0 } else { 0.0 };
            }
            _ => {
                node.active = producer.is_some();
                node.confidence = match (node.value, producer_confidence) {
                    (Some(_), Some(c)) => c,
                    _ => 0.0,
                };
            }
        }
    }

    fn index_node(&mut self, node: &Node) {
        self.by_kind.entry(node.kind).or_default().push(node.id);
        if let Some(concept) = &node.concept {
            self.by_concept.entry(concept.clone()).or_default().push(node.id);
            if let Some(period) = &node.period {
                self.by_slot
                    .entry((concept.clone(), period.clone()))
                    .or_default()
                    .push(node.id);
            }
        }
        if let Some(origin) = &node.origin {
            self.by_cell.entry(origin.clone()).or_default().push(node.id);
        }
    }

    /// Rebuilds a graph from stored records, re-deriving adjacency, indexes and
    /// confidences. Records must be dense and ordered by id.
    pub(crate) fn from_records(
        session_id: String,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> LineageResult<Self> {
        let mut graph = LineageGraph::new(session_id);
        for (i, node) in nodes.into_iter().enumerate() {
            if node.id.index() != i {
                return Err(LineageError::NodeNotFound(NodeId::new(i)));
            }
            graph.index_node(&node);
            graph.outgoing.push_node();
            graph.incoming.push_node();
            graph.active_in.push(None);
            graph.nodes.push(node);
        }
        for (i, edge) in edges.into_iter().enumerate() {
            if edge.id.index() != i {
                return Err(LineageError::EdgeNotFound(EdgeId::new(i)));
            }
            for &id in edge.source_ids.iter().chain([&edge.target_id]) {
                graph.node(id)?;
            }
            if edge.kind.is_supersession() {
                graph.supersessions.push(edge.id);
            } else {
                for &source in &edge.source_ids {
                    graph.outgoing.link(source, edge.id);
                }
                graph.incoming.link(edge.target_id, edge.id);
                if edge.active {
                    if let Some(existing) = graph.active_in[edge.target_id.index()] {
                        return Err(LineageError::violation("two active producers for one node")
                            .with_nodes([edge.target_id])
                            .with_edges([existing, edge.id]));
                    }
                    graph.active_in[edge.target_id.index()] = Some(edge.id);
                }
            }
            graph.edges.push(edge);
        }
        for i in 0..graph.nodes.len() {
            graph.refresh_node(NodeId::new(i));
        }
        Ok(graph)
    }

    // --- Lookup ---

    pub fn node(&self, id: NodeId) -> LineageResult<&Node> {
        self.nodes.get(id.index()).ok_or(LineageError::NodeNotFound(id))
    }

    pub fn edge(&self, id: EdgeId) -> LineageResult<&Edge> {
        self.edges.get(id.index()).ok_or(LineageError::EdgeNotFound(id))
    }

    /// The single active incoming edge of a node, if any.
    pub fn active_producer(&self, id: NodeId) -> LineageResult<Option<&Edge>> {
        self.node(id)?;
        Ok(self.active_in[id.index()].map(|e| &self.edges[e.index()]))
    }

    pub fn query_by_kind(&self, kind: NodeKind) -> Vec<&Node> {
        self.collect_nodes(self.by_kind.get(&kind))
    }

    pub fn query_by_concept(&self, concept: &str, period: Option<&str>) -> Vec<&Node> {
        match period {
            Some(p) => self.collect_nodes(self.by_slot.get(&(concept.to_string(), p.to_string()))),
            None => self.collect_nodes(self.by_concept.get(concept)),
        }
    }

    pub fn query_by_cell(&self, origin: &OriginKey) -> Vec<&Node> {
        self.collect_nodes(self.by_cell.get(origin))
    }

    fn collect_nodes(&self, ids: Option<&Vec<NodeId>>) -> Vec<&Node> {
        ids.map(|ids| ids.iter().map(|id| &self.nodes[id.index()]).collect())
            .unwrap_or_default()
    }

    /// Incoming edges in creation order. Supersession links are not included.
    pub fn incoming_edges(&self, id: NodeId, active_only: bool) -> LineageResult<Vec<&Edge>> {
        self.node(id)?;
        Ok(self.collect_edges(self.incoming.iter(id), active_only))
    }

    /// Outgoing edges in creation order, one entry per edge even when the node
    /// appears several times among its sources.
    pub fn outgoing_edges(&self, id: NodeId, active_only: bool) -> LineageResult<Vec<&Edge>> {
        self.node(id)?;
        let mut edges = self.collect_edges(self.outgoing.iter(id), active_only);
        edges.dedup_by_key(|e| e.id);
        Ok(edges)
    }

    fn collect_edges(&self, links: LinkIter<'_>, active_only: bool) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = links
            .map(|e| &self.edges[e.index()])
            .filter(|e| !active_only || e.active)
            .collect();
        edges.reverse();
        edges
    }

    pub(crate) fn incoming_ids(&self, id: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.incoming.iter(id)
    }

    pub(crate) fn outgoing_ids(&self, id: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.outgoing.iter(id)
    }

    // --- Traversal ---

    pub fn trace_backward(&self, id: NodeId, active_only: bool) -> LineageResult<BTreeSet<NodeId>> {
        self.node(id)?;
        Ok(topology::upstream_from(self, &[id], active_only))
    }

    pub fn trace_forward(&self, id: NodeId, active_only: bool) -> LineageResult<BTreeSet<NodeId>> {
        self.node(id)?;
        Ok(topology::downstream_from(self, &[id], active_only))
    }

    /// Shortest chain of active edges from `source` to `target`.
    pub fn find_path(&self, source: NodeId, target: NodeId) -> LineageResult<Option<Vec<PathStep>>> {
        self.node(source)?;
        self.node(target)?;
        Ok(topology::shortest_path(self, source, target))
    }

    // --- Audit queries ---

    /// Aggregated nodes that carry rejected alternatives.
    pub fn aggregations_with_conflicts(&self) -> Vec<(NodeId, Vec<EdgeId>)> {
        self.query_by_kind(NodeKind::Aggregated)
            .into_iter()
            .filter_map(|node| {
                let mut rejected: Vec<EdgeId> = self
                    .incoming
                    .iter(node.id)
                    .filter(|e| {
                        let edge = &self.edges[e.index()];
                        !edge.active && matches!(edge.kind, EdgeKind::Aggregation { .. })
                    })
                    .collect();
                rejected.reverse();
                (!rejected.is_empty()).then_some((node.id, rejected))
            })
            .collect()
    }

    /// Active edges installed by the override manager.
    pub fn user_overrides(&self) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.active && e.is_user_override()).collect()
    }

    pub fn low_confidence_mappings(&self, threshold: f64) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.active && e.kind.tier().is_some() && e.confidence < threshold)
            .collect()
    }

    /// Supersession links anchored on `id`, oldest first.
    pub fn supersession_chain(&self, id: NodeId) -> LineageResult<Vec<&Edge>> {
        self.node(id)?;
        Ok(self
            .supersessions
            .iter()
            .map(|e| &self.edges[e.index()])
            .filter(|e| e.target_id == id)
            .collect())
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut stats = GraphStatistics {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            ..Default::default()
        };
        for kind in NodeKind::ALL {
            stats
                .nodes_by_kind
                .insert(kind.as_str(), self.by_kind.get(&kind).map_or(0, Vec::len));
        }

        let mut confidence_sum = 0.0;
        for edge in &self.edges {
            *stats.edges_by_kind.entry(edge.kind.as_str()).or_insert(0) += 1;
            if let Some(tier) = edge.kind.tier() {
                *stats.mapping_tiers.entry(tier.as_str()).or_insert(0) += 1;
            }
            if let Some(strategy) = edge.kind.strategy() {
                *stats.aggregation_strategies.entry(strategy.as_str()).or_insert(0) += 1;
            }
            if edge.active {
                stats.active_edges += 1;
                confidence_sum += edge.confidence;
            } else {
                stats.inactive_edges += 1;
            }
        }
        if stats.active_edges > 0 {
            stats.average_confidence = confidence_sum / stats.active_edges as f64;
        }
        stats
    }
}
