//! Lineage and confidence core for financial statement ingestion.
//!
//! Every number handed to a downstream model is a node in a per-session
//! provenance graph. Edges record how each fact was produced and carry a
//! confidence that can only decay along the way, so any value can be traced
//! back to the spreadsheet cells it rests on and blocked when it cannot be
//! trusted.

pub mod analysis;
pub mod config;
pub mod confidence;
pub mod display;
pub mod error;
pub mod export;
pub mod resolve;
pub mod session;
pub mod store;

pub use config::LineageConfig;
pub use confidence::{BlockingReport, BlockingRuleChecker, BlockingStatus, ConfidenceLevel};
pub use error::{ConfigError, ExportError, LineageError, LineageResult};
pub use resolve::{apply_override, AggregationOutcome, AggregationResolver, Candidate};
pub use session::{run_isolated, InputBinding, Resolution, ResolvedValue, Session, SourceItem};
pub use store::{
    AggregationStrategy, Edge, EdgeId, EdgeKind, EdgeSpec, FormulaComplexity, LineageGraph, MappingTier, Node,
    NodeId, NodeKind, NodeSpec, OriginKey,
};
