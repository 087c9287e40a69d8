//! Chaos harness configuration

use crate::{ChaosError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chaos harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Master switch; when false every injection check is a no-op
    pub enabled: bool,
    /// Allow scenarios flagged for production targets to run
    pub allow_production: bool,
    /// TTL applied to injectors registered without one
    pub default_ttl: Duration,
    /// Longest TTL an injector may request
    pub max_ttl: Duration,
    /// Mount point for the management API (`/{prefix}/chaos/...`)
    pub api_prefix: String,
    /// How often expired injectors are swept
    pub sweep_interval: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_production: false,
            default_ttl: Duration::from_secs(15 * 60),
            max_ttl: Duration::from_secs(60 * 60),
            api_prefix: "api".to_string(),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl ChaosConfig {
    /// Validate all fields; called at harness construction
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(ChaosError::Config {
                field: "default_ttl",
                reason: "duration must be positive".to_string(),
            });
        }
        if self.max_ttl < self.default_ttl {
            return Err(ChaosError::Config {
                field: "max_ttl",
                reason: "must be at least default_ttl".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ChaosError::Config {
                field: "sweep_interval",
                reason: "duration must be positive".to_string(),
            });
        }
        if self.api_prefix.is_empty() || self.api_prefix.contains('/') {
            return Err(ChaosError::Config {
                field: "api_prefix",
                reason: "must be a single non-empty path segment".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        ChaosConfig::default().validate().unwrap();
    }

    #[test]
    fn test_max_ttl_below_default_rejected() {
        let mut config = ChaosConfig::default();
        config.max_ttl = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut config = ChaosConfig::default();
        config.api_prefix = "api/v1".to_string();
        assert!(config.validate().is_err());
    }
}
