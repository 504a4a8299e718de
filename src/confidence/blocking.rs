//! Go/no-go checks on the confidence of a model's critical inputs.
use super::levels::ConfidenceLevel;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Per-input bounds: below `block_below` blocks, below `warn_below` warns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub block_below: f64,
    pub warn_below: f64,
}

impl Threshold {
    pub const fn new(block_below: f64, warn_below: f64) -> Self {
        Self { block_below, warn_below }
    }

    fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.block_below)
            && (0.0..=1.0).contains(&self.warn_below)
            && self.block_below <= self.warn_below
    }
}

/// Thresholds for one downstream model, keyed by input label.
pub type ThresholdProfile = BTreeMap<String, Threshold>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockingStatus {
    Pass,
    Warning,
    Blocked,
}

impl BlockingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingStatus::Pass => "PASS",
            BlockingStatus::Warning => "WARNING",
            BlockingStatus::Blocked => "BLOCKED",
        }
    }
}

/// The verdict for a single input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub label: String,
    pub confidence: f64,
    pub status: BlockingStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockingReport {
    /// Profile name as configured, whatever spelling the caller used.
    pub model: String,
    pub status: BlockingStatus,
    /// The weakest critical input; `None` when no input was checked.
    pub overall_confidence: Option<f64>,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    /// One entry per checked input, ordered by label.
    pub findings: Vec<Finding>,
}

impl BlockingReport {
    pub fn is_blocked(&self) -> bool { self.status == BlockingStatus::Blocked }

    /// Plain-text report for audit checklists.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CONFIDENCE CHECK for model '{}': {}", self.model, self.status.as_str());
        match self.overall_confidence {
            Some(c) => {
                let _ = writeln!(out, "Overall confidence: {:.2} ({})", c, ConfidenceLevel::of(c).label());
            }
            None => {
                let _ = writeln!(out, "Overall confidence: n/a (no inputs checked)");
            }
        }
        let _ = writeln!(out, "--------------------------------------------------");
        for f in &self.findings {
            let _ = writeln!(
                out,
                "{} {:<24} {:.2} ({}) {}",
                ConfidenceLevel::of(f.confidence).marker(),
                f.label,
                f.confidence,
                ConfidenceLevel::of(f.confidence).label(),
                f.reason
            );
        }
        if !self.blockers.is_empty() {
            let _ = writeln!(out, "Blockers: {}", self.blockers.join(", "));
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings: {}", self.warnings.join(", "));
        }
        out
    }
}

fn profile(rows: &[(&str, f64, f64)]) -> ThresholdProfile {
    rows.iter()
        .map(|&(label, block, warn)| (label.to_string(), Threshold::new(block, warn)))
        .collect()
}

/// DCF, LBO and COMPS thresholds used when no configuration overrides them.
pub fn builtin_profiles() -> BTreeMap<String, ThresholdProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "DCF".to_string(),
        profile(&[
            ("Revenue", 0.60, 0.75),
            ("EBITDA", 0.60, 0.75),
            ("Net Income", 0.50, 0.60),
            ("WACC", 0.70, 0.80),
            ("Capex", 0.50, 0.60),
            ("Working Capital", 0.50, 0.60),
        ]),
    );
    profiles.insert(
        "LBO".to_string(),
        profile(&[
            ("EBITDA", 0.65, 0.75),
            ("Debt", 0.70, 0.80),
            ("Interest Expense", 0.70, 0.80),
            ("Exit EBITDA", 0.60, 0.70),
            ("IRR", 0.50, 0.65),
            ("Cash Flow", 0.60, 0.75),
        ]),
    );
    profiles.insert(
        "COMPS".to_string(),
        profile(&[
            ("Revenue", 0.60, 0.75),
            ("EBITDA", 0.60, 0.75),
            ("Market Cap", 0.80, 0.85),
            ("Enterprise Value", 0.75, 0.80),
        ]),
    );
    profiles
}

/// Checks a profile set for out-of-range or inverted thresholds.
pub fn validate_profiles(profiles: &BTreeMap<String, ThresholdProfile>) -> Result<(), ConfigError> {
    for (model, profile) in profiles {
        for (label, t) in profile {
            if !t.is_valid() {
                return Err(ConfigError::InvalidThreshold {
                    model: model.clone(),
                    label: label.clone(),
                    block_below: t.block_below,
                    warn_below: t.warn_below,
                });
            }
        }
    }
    Ok(())
}

/// Holds the caller-supplied threshold table. The engine itself hard-codes no
/// business rule beyond "zero confidence always blocks".
#[derive(Debug, Clone)]
pub struct BlockingRuleChecker {
    profiles: BTreeMap<String, ThresholdProfile>,
}

impl Default for BlockingRuleChecker {
    fn default() -> Self {
        Self { profiles: builtin_profiles() }
    }
}

impl BlockingRuleChecker {
    pub fn new(profiles: BTreeMap<String, ThresholdProfile>) -> Result<Self, ConfigError> {
        validate_profiles(&profiles)?;
        Ok(Self { profiles })
    }

    pub(crate) fn from_validated(profiles: BTreeMap<String, ThresholdProfile>) -> Self {
        Self { profiles }
    }

    pub fn profile(&self, model: &str) -> Option<&ThresholdProfile> {
        self.lookup(model).map(|(_, profile)| profile)
    }

    /// Exact name first, then a case-insensitive match. `COMPARABLES` is
    /// accepted for `COMPS`.
    fn lookup(&self, model: &str) -> Option<(&str, &ThresholdProfile)> {
        if let Some((name, profile)) = self.profiles.get_key_value(model) {
            return Some((name.as_str(), profile));
        }
        let wanted = if model.eq_ignore_ascii_case("COMPARABLES") { "COMPS" } else { model };
        self.profiles
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(name, profile)| (name.as_str(), profile))
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn check(
        &self,
        model: &str,
        critical_inputs: &BTreeMap<String, f64>,
    ) -> Result<BlockingReport, ConfigError> {
        let (name, profile) = self
            .lookup(model)
            .ok_or_else(|| ConfigError::UnknownProfile(model.to_string()))?;

        let findings: Vec<Finding> = critical_inputs
            .iter()
            .map(|(label, &confidence)| judge(label, confidence, profile.get(label)))
            .collect();

        let pick = |status: BlockingStatus| {
            findings
                .iter()
                .filter(|f| f.status == status)
                .map(|f| f.label.clone())
                .collect::<Vec<_>>()
        };
        let blockers = pick(BlockingStatus::Blocked);
        let warnings = pick(BlockingStatus::Warning);

        let status = if !blockers.is_empty() {
            BlockingStatus::Blocked
        } else if !warnings.is_empty() {
            BlockingStatus::Warning
        } else {
            BlockingStatus::Pass
        };

        let overall_confidence = findings.iter().map(|f| f.confidence).reduce(f64::min);

        Ok(BlockingReport {
            model: name.to_string(),
            status,
            overall_confidence,
            blockers,
            warnings,
            findings,
        })
    }
}

fn judge(label: &str, confidence: f64, threshold: Option<&Threshold>) -> Finding {
    let (status, reason) = if confidence <= 0.0 || confidence.is_nan() {
        (BlockingStatus::Blocked, "no trusted value (confidence 0.00)".to_string())
    } else {
        match threshold {
            None => (BlockingStatus::Warning, "no threshold configured".to_string()),
            Some(t) if confidence < t.block_below => (
                BlockingStatus::Blocked,
                format!("below blocking threshold {:.2}", t.block_below),
            ),
            Some(t) if confidence < t.warn_below => (
                BlockingStatus::Warning,
                format!("below warning threshold {:.2}", t.warn_below),
            ),
            Some(_) => (BlockingStatus::Pass, "meets thresholds".to_string()),
        }
    };
    Finding { label: label.to_string(), confidence, status, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn inputs(rows: &[(&str, f64)]) -> BTreeMap<String, f64> {
        rows.iter().map(|&(l, c)| (l.to_string(), c)).collect()
    }

    #[test]
    fn test_warning_without_blockers() {
        let checker = BlockingRuleChecker::default();
        let report = checker
            .check("DCF", &inputs(&[("Revenue", 0.855), ("EBITDA", 0.68)]))
            .unwrap();
        assert_eq!(report.status, BlockingStatus::Warning);
        assert!(report.blockers.is_empty());
        assert_eq!(report.warnings, vec!["EBITDA".to_string()]);
    }

    #[rstest]
    #[case(0.0, BlockingStatus::Blocked)]
    #[case(0.59, BlockingStatus::Blocked)]
    #[case(0.60, BlockingStatus::Warning)]
    #[case(0.75, BlockingStatus::Pass)]
    fn test_revenue_bands(#[case] confidence: f64, #[case] expected: BlockingStatus) {
        let checker = BlockingRuleChecker::default();
        let report = checker.check("DCF", &inputs(&[("Revenue", confidence)])).unwrap();
        assert_eq!(report.status, expected);
    }

    #[test]
    fn test_zero_blocks_even_with_permissive_threshold() {
        let mut profiles = BTreeMap::new();
        profiles.insert("Custom".to_string(), profile(&[("Cash", 0.0, 0.0)]));
        let checker = BlockingRuleChecker::new(profiles).unwrap();
        let report = checker.check("Custom", &inputs(&[("Cash", 0.0)])).unwrap();
        assert_eq!(report.blockers, vec!["Cash".to_string()]);
    }

    #[test]
    fn test_unconfigured_input_warns() {
        let checker = BlockingRuleChecker::default();
        let report = checker.check("COMPS", &inputs(&[("Beta", 0.99)])).unwrap();
        assert_eq!(report.status, BlockingStatus::Warning);
        assert_eq!(report.findings[0].reason, "no threshold configured");
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let checker = BlockingRuleChecker::default();
        let err = checker.check("SOTP", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(m) if m == "SOTP"));
    }

    #[rstest]
    #[case("DCF", "DCF")]
    #[case("dcf", "DCF")]
    #[case("Lbo", "LBO")]
    #[case("comparables", "COMPS")]
    #[case("COMPARABLES", "COMPS")]
    fn test_model_name_lookup(#[case] asked: &str, #[case] canonical: &str) {
        let checker = BlockingRuleChecker::default();
        let report = checker.check(asked, &inputs(&[("EBITDA", 0.9)])).unwrap();
        assert_eq!(report.model, canonical);
        assert_eq!(report.status, BlockingStatus::Pass);
        assert!(checker.profile(asked).is_some());
    }

    #[test]
    fn test_overall_confidence_is_weakest_input() {
        let checker = BlockingRuleChecker::default();
        let report = checker
            .check("DCF", &inputs(&[("Revenue", 0.855), ("EBITDA", 0.68), ("WACC", 0.95)]))
            .unwrap();
        assert_eq!(report.overall_confidence, Some(0.68));
        assert!(report.render().contains("Overall confidence: 0.68 (Medium)"));

        let empty = checker.check("DCF", &BTreeMap::new()).unwrap();
        assert_eq!(empty.overall_confidence, None);
        assert_eq!(empty.status, BlockingStatus::Pass);
        assert!(empty.render().contains("Overall confidence: n/a"));
    }

    #[test]
    fn test_inverted_threshold_rejected() {
        let mut profiles = BTreeMap::new();
        profiles.insert("Bad".to_string(), profile(&[("Revenue", 0.8, 0.6)]));
        assert!(matches!(
            BlockingRuleChecker::new(profiles),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_render_lists_blockers() {
        let checker = BlockingRuleChecker::default();
        let report = checker
            .check("DCF", &inputs(&[("Capex", 0.0), ("Revenue", 0.9)]))
            .unwrap();
        let text = report.render();
        assert!(text.contains("BLOCKED"));
        assert!(text.contains("Blockers: Capex"));
    }
}
