//! Session configuration, loaded from JSON. Every field has a default.
use crate::confidence::blocking::{builtin_profiles, validate_profiles, ThresholdProfile};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

pub const DEFAULT_TOTAL_DISAGREEMENT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Relative difference above which two total lines are said to disagree.
    pub total_disagreement_tolerance: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { total_disagreement_tolerance: DEFAULT_TOTAL_DISAGREEMENT_TOLERANCE }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub resolver: ResolverConfig,
    /// Model name to threshold profile.
    pub blocking: BTreeMap<String, ThresholdProfile>,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self { resolver: ResolverConfig::default(), blocking: builtin_profiles() }
    }
}

impl LineageConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tol = self.resolver.total_disagreement_tolerance;
        if !(0.0..1.0).contains(&tol) {
            return Err(ConfigError::InvalidTolerance(tol));
        }
        validate_profiles(&self.blocking)
    }
}
