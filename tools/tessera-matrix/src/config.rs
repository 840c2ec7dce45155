//! Engine configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_common::{Error, Mode, Result};

use crate::costing::HierarchyLimits;

/// When a connected pair stops searching for a cheaper connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Confirm on the first connection
    FirstConnection,
    /// Keep improving for a number of rounds after the first connection;
    /// `None` picks the per-mode default
    GracePeriod {
        #[serde(default)]
        iterations: Option<u32>,
    },
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        ConnectionPolicy::GracePeriod { iterations: None }
    }
}

fn default_max_reserved_labels_count() -> usize {
    1_000_000
}

fn default_bucket_size() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMatrixConfig {
    /// Label capacity kept per search between queries
    #[serde(default = "default_max_reserved_labels_count")]
    pub max_reserved_labels_count: usize,
    /// Width of one frontier bucket, in cost units
    #[serde(default = "default_bucket_size")]
    pub bucket_size: f32,
    /// Expansions allowed per location (unlimited when absent)
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
    /// Replaces the costing's per-level limits
    #[serde(default)]
    pub hierarchy_limits: Option<Vec<HierarchyLimits>>,
}

impl Default for CostMatrixConfig {
    fn default() -> Self {
        Self {
            max_reserved_labels_count: default_max_reserved_labels_count(),
            bucket_size: default_bucket_size(),
            max_iterations: None,
            connection_policy: ConnectionPolicy::default(),
            hierarchy_limits: None,
        }
    }
}

impl CostMatrixConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bucket_size.is_finite() && self.bucket_size > 0.0) {
            return Err(Error::Config(format!(
                "bucket_size must be positive, got {}",
                self.bucket_size
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(Error::Config("max_iterations must be at least 1".into()));
        }
        if let Some(limits) = &self.hierarchy_limits {
            if let Some(bad) = limits
                .iter()
                .find(|l| l.expansion_within_dist.is_nan() || l.expansion_within_dist < 0.0)
            {
                return Err(Error::Config(format!(
                    "expansion_within_dist must be non-negative, got {}",
                    bad.expansion_within_dist
                )));
            }
        }
        Ok(())
    }

    /// Rounds a pair keeps improving after its first connection;
    /// `None` means confirm immediately
    pub fn grace_iterations(&self, mode: Mode, location_count: usize) -> Option<u32> {
        match self.connection_policy {
            ConnectionPolicy::FirstConnection => None,
            ConnectionPolicy::GracePeriod {
                iterations: Some(n),
            } => Some(n),
            ConnectionPolicy::GracePeriod { iterations: None } => Some(match mode {
                Mode::Car => (location_count / 3).clamp(100, 2700) as u32,
                Mode::Bike | Mode::Foot => 500,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let config = CostMatrixConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CostMatrixConfig::default());
        assert_eq!(config.max_reserved_labels_count, 1_000_000);
        assert_eq!(
            config.connection_policy,
            ConnectionPolicy::GracePeriod { iterations: None }
        );
    }

    #[test]
    fn parses_policies() {
        let config =
            CostMatrixConfig::from_json_str(r#"{"connection_policy": {"kind": "first_connection"}}"#)
                .unwrap();
        assert_eq!(config.connection_policy, ConnectionPolicy::FirstConnection);
        assert_eq!(config.grace_iterations(Mode::Car, 10), None);

        let config = CostMatrixConfig::from_json_str(
            r#"{"connection_policy": {"kind": "grace_period", "iterations": 42}, "max_iterations": 1000}"#,
        )
        .unwrap();
        assert_eq!(config.grace_iterations(Mode::Foot, 10), Some(42));
        assert_eq!(config.max_iterations, Some(1000));
    }

    #[test]
    fn default_grace_per_mode() {
        let config = CostMatrixConfig::default();
        assert_eq!(config.grace_iterations(Mode::Car, 2), Some(100));
        assert_eq!(config.grace_iterations(Mode::Car, 900), Some(300));
        assert_eq!(config.grace_iterations(Mode::Car, 100_000), Some(2700));
        assert_eq!(config.grace_iterations(Mode::Bike, 2), Some(500));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(CostMatrixConfig::from_json_str(r#"{"bucket_size": 0}"#).is_err());
        assert!(CostMatrixConfig::from_json_str(r#"{"max_iterations": 0}"#).is_err());
        assert!(CostMatrixConfig::from_json_str(
            r#"{"hierarchy_limits": [{"max_up_transitions": 1, "expansion_within_dist": -5}]}"#
        )
        .is_err());
        assert!(CostMatrixConfig::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bucket_size": 5.0}}"#).unwrap();
        let config = CostMatrixConfig::load(file.path()).unwrap();
        assert_eq!(config.bucket_size, 5.0);

        let missing = file.path().with_extension("missing");
        assert!(matches!(CostMatrixConfig::load(&missing), Err(Error::Io(_))));
    }
}
