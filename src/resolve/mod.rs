//! Decisions that write to the graph on behalf of the pipeline: slot
//! aggregation and user overrides.
pub mod aggregation;
pub mod overrides;

pub use aggregation::{AggregationOutcome, AggregationResolver, Candidate};
pub use overrides::{apply_override, locate_slot};
