//! Graph-wide algorithms: traversal, path finding and invariant verification.
pub mod invariants;
pub mod topology;

pub use invariants::{verify, InvariantChecker, InvariantKind, InvariantViolation};
