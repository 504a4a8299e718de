//! The fixed scoring tables. These numbers are a contract: two systems given
//! the same lineage must arrive at the same confidences.

use crate::store::{AggregationStrategy, FormulaComplexity, MappingTier};

/// Extraction copies a cell verbatim.
pub const EXTRACTION_MULTIPLIER: f64 = 1.0;

const HIERARCHY_BASE: f64 = 0.70;
const HIERARCHY_STEP: f64 = 0.05;
const HIERARCHY_FLOOR: f64 = 0.50;

impl MappingTier {
    pub fn base_confidence(&self) -> f64 {
        match self {
            MappingTier::UserOverride => 1.00,
            MappingTier::ExplicitAlias => 0.95,
            MappingTier::ExactMatch => 0.90,
            MappingTier::FuzzyMatch => 0.70,
            MappingTier::KeywordMatch => 0.70,
            MappingTier::HierarchyFallback { depth } => {
                (HIERARCHY_BASE - HIERARCHY_STEP * f64::from(*depth)).max(HIERARCHY_FLOOR)
            }
            MappingTier::Unresolved => 0.00,
        }
    }

    pub fn rationale(&self) -> &'static str {
        match self {
            MappingTier::UserOverride => "user override, highest trust",
            MappingTier::ExplicitAlias => "explicit alias, manually curated",
            MappingTier::ExactMatch => "exact taxonomy label",
            MappingTier::FuzzyMatch => "fuzzy taxonomy search",
            MappingTier::KeywordMatch => "keyword match",
            MappingTier::HierarchyFallback { .. } => "walked up the presentation hierarchy",
            MappingTier::Unresolved => "no matching concept",
        }
    }
}

impl AggregationStrategy {
    pub fn multiplier(&self) -> f64 {
        match self {
            AggregationStrategy::TotalLineUsed => 0.95,
            AggregationStrategy::ComponentSum => 0.85,
            AggregationStrategy::SingleValue => 0.90,
            AggregationStrategy::MaxValueTieBreak => 0.60,
        }
    }

    pub fn rationale(&self) -> &'static str {
        match self {
            AggregationStrategy::TotalLineUsed => "reported total line used, components excluded",
            AggregationStrategy::ComponentSum => "components summed, no total line reported",
            AggregationStrategy::SingleValue => "single value, nothing to reconcile",
            AggregationStrategy::MaxValueTieBreak => "disagreeing totals, maximum taken",
        }
    }
}

impl FormulaComplexity {
    pub fn multiplier(&self) -> f64 {
        match self {
            FormulaComplexity::SimpleArithmetic => 1.00,
            FormulaComplexity::MultiplyDivide => 0.98,
            FormulaComplexity::GrowthRate => 0.95,
            FormulaComplexity::WeightedBlend => 0.90,
            FormulaComplexity::PerpetuityProjection => 0.85,
            FormulaComplexity::Iterative => 0.80,
            FormulaComplexity::Undefined => 0.00,
        }
    }

    /// Guesses the complexity class from a descriptive formula string.
    /// Named techniques take precedence over operator symbols.
    pub fn infer(formula: &str) -> Self {
        let lower = formula.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if mentions(&["irr", "internal rate", "solver", "goal seek"]) {
            FormulaComplexity::Iterative
        } else if mentions(&["wacc", "cost of capital", "weighted"]) {
            FormulaComplexity::WeightedBlend
        } else if mentions(&["terminal", "perpetuity"]) {
            FormulaComplexity::PerpetuityProjection
        } else if mentions(&["growth", "cagr", "yoy"]) {
            FormulaComplexity::GrowthRate
        } else if formula.contains(['*', '/', '×', '÷']) {
            FormulaComplexity::MultiplyDivide
        } else {
            FormulaComplexity::SimpleArithmetic
        }
    }
}
