//! Confidence scoring, propagation and go/no-go checks.
pub mod blocking;
pub mod levels;
pub mod propagation;
pub mod scoring;

pub use blocking::{
    builtin_profiles, BlockingReport, BlockingRuleChecker, BlockingStatus, Finding, Threshold,
    ThresholdProfile,
};
pub use levels::ConfidenceLevel;
pub use propagation::{score, Scoring, ScoringBasis, MONOTONICITY_TOLERANCE};
