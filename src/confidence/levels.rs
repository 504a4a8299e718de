use serde::Serialize;

/// Coarse confidence bands used in reports and explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    Good,
    High,
    Perfect,
}

impl ConfidenceLevel {
    pub fn of(score: f64) -> Self {
        if score >= 1.0 {
            ConfidenceLevel::Perfect
        } else if score >= 0.90 {
            ConfidenceLevel::High
        } else if score >= 0.70 {
            ConfidenceLevel::Good
        } else if score >= 0.40 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::Perfect => "Perfect",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Good => "Good",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }

    /// ASCII marker for plain-text reports.
    pub fn marker(&self) -> &'static str {
        match self {
            ConfidenceLevel::Perfect | ConfidenceLevel::High => "[ok]",
            ConfidenceLevel::Good => "[~]",
            ConfidenceLevel::Medium => "[!]",
            ConfidenceLevel::Low => "[x]",
        }
    }
}

/// `"0.86 (Good)"`
pub fn badge(score: f64) -> String {
    format!("{:.2} ({})", score, ConfidenceLevel::of(score).label())
}
