//! Weakest-link propagation of confidence through a single transformation.

use super::scoring::EXTRACTION_MULTIPLIER;
use crate::store::{AggregationStrategy, EdgeKind, FormulaComplexity, MappingTier};
use serde::{Deserialize, Serialize};

/// Slack allowed when comparing a target's confidence with its sources.
pub const MONOTONICITY_TOLERANCE: f64 = 1e-6;

/// Which table row produced an edge's multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringBasis {
    Extraction,
    Tier(MappingTier),
    Strategy(AggregationStrategy),
    Complexity(FormulaComplexity),
    Supersession,
}

impl ScoringBasis {
    pub fn of(kind: &EdgeKind) -> Self {
        match kind {
            EdgeKind::Extraction => ScoringBasis::Extraction,
            EdgeKind::Mapping { tier } => ScoringBasis::Tier(*tier),
            EdgeKind::Aggregation { strategy, .. } => ScoringBasis::Strategy(*strategy),
            EdgeKind::Calculation { complexity, .. } => ScoringBasis::Complexity(*complexity),
            EdgeKind::Supersession { .. } => ScoringBasis::Supersession,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            ScoringBasis::Extraction => EXTRACTION_MULTIPLIER,
            ScoringBasis::Tier(tier) => tier.base_confidence(),
            ScoringBasis::Strategy(strategy) => strategy.multiplier(),
            ScoringBasis::Complexity(complexity) => complexity.multiplier(),
            ScoringBasis::Supersession => 0.0,
        }
    }

    fn describe(&self) -> String {
        match self {
            ScoringBasis::Extraction => "extraction".to_string(),
            ScoringBasis::Tier(t) => format!("mapping:{} ({})", t.as_str(), t.rationale()),
            ScoringBasis::Strategy(s) => format!("aggregation:{} ({})", s.as_str(), s.rationale()),
            ScoringBasis::Complexity(c) => format!("calculation:{}", c.as_str()),
            ScoringBasis::Supersession => "supersession".to_string(),
        }
    }
}

/// Structured record of how an edge's confidence was obtained.
/// The explanation text is generated from it, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub basis: ScoringBasis,
    /// Weakest source confidence at creation time.
    pub min_source: f64,
    pub multiplier: f64,
    /// Set only on edges installed by the override manager.
    pub user_override: bool,
}

impl Scoring {
    pub fn confidence(&self) -> f64 {
        if self.user_override {
            return 1.0;
        }
        if matches!(self.basis, ScoringBasis::Supersession) {
            return 0.0;
        }
        propagate(self.min_source, self.multiplier)
    }

    /// Marks the scoring as a sanctioned user override: confidence becomes the
    /// fixed point 1.0 whatever the inputs.
    pub fn into_user_override(self) -> Self {
        Self { user_override: true, multiplier: 1.0, ..self }
    }

    pub(crate) fn supersession() -> Self {
        Self { basis: ScoringBasis::Supersession, min_source: 0.0, multiplier: 0.0, user_override: false }
    }

    /// e.g. `MIN(0.90) = 0.90 × aggregation:total_line_used (...) 0.95 = 0.855`
    pub fn explain(&self) -> String {
        if self.user_override {
            return format!("user override via {} = 1.000 (fixed point)", self.basis.describe());
        }
        format!(
            "MIN({:.2}) × {} {:.2} = {:.3}",
            self.min_source,
            self.basis.describe(),
            self.multiplier,
            self.confidence()
        )
    }
}

/// `min_source × multiplier`, floored at 0 and never above `min_source`.
pub fn propagate(min_source: f64, multiplier: f64) -> f64 {
    (min_source * multiplier).max(0.0).min(min_source.max(0.0))
}

/// Weakest link of a set of source confidences. No sources means no trust.
pub fn weakest(source_confidences: &[f64]) -> f64 {
    if source_confidences.is_empty() {
        return 0.0;
    }
    source_confidences.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Scores an edge of `kind` fed by sources with the given confidences.
pub fn score(kind: &EdgeKind, source_confidences: &[f64]) -> Scoring {
    let basis = ScoringBasis::of(kind);
    Scoring {
        basis,
        min_source: weakest(source_confidences),
        multiplier: basis.multiplier(),
        user_override: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Exclusion;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_total_line_propagation() {
        let kind = EdgeKind::Aggregation { strategy: AggregationStrategy::TotalLineUsed, excluded: vec![] };
        let s = score(&kind, &[0.90]);
        assert_abs_diff_eq!(s.confidence(), 0.855, epsilon = 1e-12);
        assert!(s.explain().contains("0.855"));
    }

    #[test]
    fn test_component_sum_takes_weakest() {
        let kind = EdgeKind::Aggregation {
            strategy: AggregationStrategy::ComponentSum,
            excluded: vec![Exclusion { node_id: Default::default(), reason: "x".into() }],
        };
        let s = score(&kind, &[0.90, 0.70]);
        assert_abs_diff_eq!(s.min_source, 0.70);
        assert_abs_diff_eq!(s.confidence(), 0.595, epsilon = 1e-12);
    }

    #[test]
    fn test_no_sources_means_zero() {
        let s = score(&EdgeKind::Extraction, &[]);
        assert_eq!(s.confidence(), 0.0);
    }

    #[test]
    fn test_override_is_fixed_point() {
        let kind = EdgeKind::Mapping { tier: MappingTier::UserOverride };
        let s = score(&kind, &[0.4]).into_user_override();
        assert_eq!(s.confidence(), 1.0);
        // The ordinary path never exceeds its weakest input.
        assert_abs_diff_eq!(score(&kind, &[0.4]).confidence(), 0.4);
    }

    #[test]
    fn test_propagate_is_capped_and_floored() {
        assert_eq!(propagate(0.5, 1.5), 0.5);
        assert_eq!(propagate(0.5, -1.0), 0.0);
    }
}
