use crate::confidence::Scoring;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "n{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl EdgeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "e{}", self.0) }
}

/// Pipeline stage of a fact. Ordered from the trust anchor downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    SourceCell,
    Extracted,
    Mapped,
    Aggregated,
    Calculated,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::SourceCell,
        NodeKind::Extracted,
        NodeKind::Mapped,
        NodeKind::Aggregated,
        NodeKind::Calculated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::SourceCell => "source_cell",
            NodeKind::Extracted => "extracted",
            NodeKind::Mapped => "mapped",
            NodeKind::Aggregated => "aggregated",
            NodeKind::Calculated => "calculated",
        }
    }

    /// Every stage after the raw cell is tied to a reporting period.
    pub fn requires_period(&self) -> bool { *self != NodeKind::SourceCell }
}

/// Location of a raw spreadsheet cell. Opaque to the core, passed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginKey {
    pub sheet: String,
    pub row: u32,
    pub column: u32,
}

impl OriginKey {
    pub fn new(sheet: impl Into<String>, row: u32, column: u32) -> Self {
        Self { sheet: sheet.into(), row, column }
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!R{}C{}", self.sheet, self.row, self.column)
    }
}

/// An immutable financial fact at one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub concept: Option<String>,
    pub period: Option<String>,
    pub label: Option<String>,
    pub value: Option<f64>,
    /// Derived from the active producer. Never set by callers.
    pub confidence: f64,
    pub active: bool,
    pub origin: Option<OriginKey>,
}

impl Node {
    /// A short human name: label, then concept, then the node id.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.concept.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn has_value(&self) -> bool { self.value.is_some() }
}

/// How a raw label was resolved to a concept by the external mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingTier {
    UserOverride,
    ExplicitAlias,
    ExactMatch,
    FuzzyMatch,
    KeywordMatch,
    /// The mapper walked `depth` levels up the presentation hierarchy.
    HierarchyFallback { depth: u32 },
    Unresolved,
}

impl MappingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingTier::UserOverride => "user_override",
            MappingTier::ExplicitAlias => "explicit_alias",
            MappingTier::ExactMatch => "exact_match",
            MappingTier::FuzzyMatch => "fuzzy_match",
            MappingTier::KeywordMatch => "keyword_match",
            MappingTier::HierarchyFallback { .. } => "hierarchy_fallback",
            MappingTier::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    TotalLineUsed,
    ComponentSum,
    SingleValue,
    MaxValueTieBreak,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::TotalLineUsed => "total_line_used",
            AggregationStrategy::ComponentSum => "component_sum",
            AggregationStrategy::SingleValue => "single_value",
            AggregationStrategy::MaxValueTieBreak => "max_value_tie_break",
        }
    }
}

/// Complexity class of a calculation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaComplexity {
    SimpleArithmetic,
    MultiplyDivide,
    GrowthRate,
    WeightedBlend,
    PerpetuityProjection,
    Iterative,
    /// Division by zero or otherwise undefined.
    Undefined,
}

impl FormulaComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaComplexity::SimpleArithmetic => "simple_arithmetic",
            FormulaComplexity::MultiplyDivide => "multiply_divide",
            FormulaComplexity::GrowthRate => "growth_rate",
            FormulaComplexity::WeightedBlend => "weighted_blend",
            FormulaComplexity::PerpetuityProjection => "perpetuity_projection",
            FormulaComplexity::Iterative => "iterative",
            FormulaComplexity::Undefined => "undefined",
        }
    }
}

/// A candidate that was considered by an aggregation but not used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub node_id: NodeId,
    pub reason: String,
}

/// The transformation an edge performs, with its per-kind payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    Extraction,
    Mapping { tier: MappingTier },
    Aggregation { strategy: AggregationStrategy, excluded: Vec<Exclusion> },
    /// `formula` is explanatory text such as `"a - b - c"`, never evaluated.
    Calculation { formula: String, complexity: FormulaComplexity },
    /// Audit link recording that `superseded` lost its authority to `replacement`.
    Supersession { superseded: EdgeId, replacement: EdgeId },
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Extraction => "extraction",
            EdgeKind::Mapping { .. } => "mapping",
            EdgeKind::Aggregation { .. } => "aggregation",
            EdgeKind::Calculation { .. } => "calculation",
            EdgeKind::Supersession { .. } => "supersession",
        }
    }

    pub fn tier(&self) -> Option<MappingTier> {
        match self {
            EdgeKind::Mapping { tier } => Some(*tier),
            _ => None,
        }
    }

    pub fn strategy(&self) -> Option<AggregationStrategy> {
        match self {
            EdgeKind::Aggregation { strategy, .. } => Some(*strategy),
            _ => None,
        }
    }

    pub fn is_supersession(&self) -> bool { matches!(self, EdgeKind::Supersession { .. }) }
}

pub type SourceIds = SmallVec<[NodeId; 4]>;

/// A transformation producing one target node from one or more source nodes.
///
/// Supersession edges anchor on the slot node whose producer changed
/// (`source_ids == [target_id]`), are never active and are kept out of the
/// traversal adjacency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub source_ids: SourceIds,
    pub target_id: NodeId,
    pub method: String,
    pub confidence: f64,
    pub scoring: Scoring,
    pub active: bool,
    /// Why this path was or was not taken.
    pub condition: Option<String>,
}

impl Edge {
    pub fn is_user_override(&self) -> bool { self.scoring.user_override }
}

/// Caller input for [`crate::store::LineageGraph::add_node`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub concept: Option<String>,
    pub period: Option<String>,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub origin: Option<OriginKey>,
}

impl NodeSpec {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, concept: None, period: None, label: None, value: None, origin: None }
    }

    pub fn source_cell(origin: OriginKey, value: Option<f64>) -> Self {
        Self { origin: Some(origin), value, ..Self::new(NodeKind::SourceCell) }
    }

    pub fn concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = Some(concept.into());
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn maybe_value(mut self, value: Option<f64>) -> Self {
        self.value = value;
        self
    }
}

/// Caller input for [`crate::store::LineageGraph::add_edge`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    pub kind: EdgeKind,
    pub source_ids: Vec<NodeId>,
    pub target_id: NodeId,
    pub method: String,
    pub active: bool,
    pub condition: Option<String>,
}

impl EdgeSpec {
    pub fn new(kind: EdgeKind, source_ids: Vec<NodeId>, target_id: NodeId, method: impl Into<String>) -> Self {
        Self { kind, source_ids, target_id, method: method.into(), active: true, condition: None }
    }

    /// Records the edge as a rejected alternative.
    pub fn inactive(mut self, reason: impl Into<String>) -> Self {
        self.active = false;
        self.condition = Some(reason.into());
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}
