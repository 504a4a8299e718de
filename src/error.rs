//! Error types shared by the graph store, the resolver and the override manager.

use crate::store::{EdgeId, NodeId};
use thiserror::Error;

/// A structural failure of a single graph operation.
///
/// Every variant carries the ids involved so a caller (or an auditor) can
/// explain the failure in terms of the graph. The operation that returned the
/// error left the graph untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineageError {
    #[error("Lineage violation: {reason} (nodes {nodes:?}, edges {edges:?})")]
    LineageViolation {
        reason: String,
        nodes: Vec<NodeId>,
        edges: Vec<EdgeId>,
    },
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),
    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),
    #[error("No node for concept '{concept}' in period '{period}'")]
    SlotNotFound { concept: String, period: String },
    #[error("Confidence violation on edge into {target}: {confidence} (allowed at most {bound})")]
    ConfidenceViolation {
        target: NodeId,
        edge: Option<EdgeId>,
        confidence: f64,
        bound: f64,
    },
    #[error("Speculation violation at {target}: {reason} (sources {sources:?})")]
    SpeculationViolation {
        target: NodeId,
        sources: Vec<NodeId>,
        reason: String,
    },
}

impl LineageError {
    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        LineageError::LineageViolation {
            reason: reason.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub(crate) fn with_nodes(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        if let LineageError::LineageViolation { nodes, .. } = &mut self {
            nodes.extend(ids);
        }
        self
    }

    pub(crate) fn with_edges(mut self, ids: impl IntoIterator<Item = EdgeId>) -> Self {
        if let LineageError::LineageViolation { edges, .. } = &mut self {
            edges.extend(ids);
        }
        self
    }
}

/// Invalid or unusable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Threshold for '{label}' in profile '{model}' is invalid: block_below={block_below}, warn_below={warn_below}")]
    InvalidThreshold {
        model: String,
        label: String,
        block_below: f64,
        warn_below: f64,
    },
    #[error("Tolerance {0} is outside [0, 1)")]
    InvalidTolerance(f64),
    #[error("No threshold profile configured for model '{0}'")]
    UnknownProfile(String),
}

/// Failure while writing or reading the export document.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Export document is inconsistent: {0}")]
    Inconsistent(String),
    #[error("Imported graph breaks lineage rules: {0}")]
    Lineage(#[from] LineageError),
}

pub type LineageResult<T> = Result<T, LineageError>;
