//! Human-facing views of the lineage: trace trees and explanations.
pub mod explain;
pub mod trace;

pub use explain::{explain, trace_to_source, Alternative, Explanation, ExplanationStep};
pub use trace::format_trace;
