//! The graph store: node and edge arenas, adjacency and lookup indexes.
pub mod registry;
pub mod types;

pub use registry::{GraphStatistics, LineageGraph, PathStep};
pub use types::{
    AggregationStrategy, Edge, EdgeId, EdgeKind, EdgeSpec, Exclusion, FormulaComplexity,
    MappingTier, Node, NodeId, NodeKind, NodeSpec, OriginKey, SourceIds,
};
