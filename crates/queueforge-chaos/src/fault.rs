//! Fault injector definitions and validation

use crate::{ChaosError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Kinds of faults the harness can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Sleep before the operation proceeds
    Latency,
    /// Fail the operation with a typed error
    Error,
    /// Abort the calling operation with a tagged message
    Panic,
    /// Fail each item of a batch independently
    PartialFail,
    /// Burn CPU/memory in the worker (executed by the worker runtime)
    ResourceHog,
    /// Latency on the Redis hop specifically
    RedisLatency,
    /// Dropped Redis command
    RedisDrop,
}

impl FaultType {
    /// Stable string form for metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Error => "error",
            Self::Panic => "panic",
            Self::PartialFail => "partial_fail",
            Self::ResourceHog => "resource_hog",
            Self::RedisLatency => "redis_latency",
            Self::RedisDrop => "redis_drop",
        }
    }
}

/// What an injector applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultScope {
    /// Every operation
    Global,
    /// A single worker id
    Worker,
    /// A single queue
    Queue,
    /// A single tenant
    Tenant,
}

/// Tuning knobs; unset fields take type-specific defaults at validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultParams {
    /// Base injected latency in milliseconds
    pub latency_ms: Option<u64>,
    /// Uniform jitter applied around the base latency
    pub jitter_ms: Option<u64>,
    /// Per-item failure probability for partial failures
    pub fail_rate: Option<f64>,
    /// Error text surfaced by error/panic faults
    pub error_message: Option<String>,
}

/// Default base latency when a latency injector omits it
pub const DEFAULT_LATENCY_MS: u64 = 100;
/// Default per-item failure rate for partial failures
pub const DEFAULT_FAIL_RATE: f64 = 0.5;

/// A registered, scoped, probabilistic fault directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultSpec {
    /// Unique injector id
    pub id: String,
    /// What gets injected
    pub fault_type: FaultType,
    /// Where it applies
    pub scope: FaultScope,
    /// Scope selector; required for non-global scopes
    pub scope_value: Option<String>,
    /// Disabled injectors never fire but stay registered
    pub enabled: bool,
    /// Chance of firing per matching operation (0.0-1.0)
    pub probability: f64,
    /// Type-specific parameters
    pub params: FaultParams,
    /// When the injector was registered
    pub created_at: DateTime<Utc>,
    /// Auto-removal time
    pub expires_at: Option<DateTime<Utc>>,
}

impl FaultSpec {
    /// Create an enabled injector that always fires, with a fresh id
    pub fn new(fault_type: FaultType, scope: FaultScope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fault_type,
            scope,
            scope_value: None,
            enabled: true,
            probability: 1.0,
            params: FaultParams::default(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Set the scope selector
    pub fn with_scope_value(mut self, value: impl Into<String>) -> Self {
        self.scope_value = Some(value.into());
        self
    }

    /// Set the firing probability
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    /// Set type-specific parameters
    pub fn with_params(mut self, params: FaultParams) -> Self {
        self.params = params;
        self
    }

    /// Expire the injector after a TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default());
        self
    }

    /// Whether the injector has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Whether the injector applies to (scope, value)
    pub fn matches(&self, scope: FaultScope, scope_value: &str) -> bool {
        match self.scope {
            FaultScope::Global => true,
            other => other == scope && self.scope_value.as_deref() == Some(scope_value),
        }
    }

    /// Validate and fill parameter defaults; fails on inconsistent specs
    pub fn validate(&mut self, default_ttl: Duration, max_ttl: Duration) -> Result<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(ChaosError::Validation(format!(
                "probability {} out of range [0, 1]",
                self.probability
            )));
        }

        if self.scope != FaultScope::Global
            && self.scope_value.as_deref().is_none_or(str::is_empty)
        {
            return Err(ChaosError::Validation(format!(
                "scope {:?} requires a non-empty scope_value",
                self.scope
            )));
        }

        if let Some(rate) = self.params.fail_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ChaosError::Validation(format!(
                    "fail_rate {} out of range [0, 1]",
                    rate
                )));
            }
        }

        match self.expires_at {
            None => {
                self.expires_at =
                    Some(Utc::now() + chrono::Duration::from_std(default_ttl).unwrap_or_default());
            }
            Some(at) => {
                let cap = Utc::now() + chrono::Duration::from_std(max_ttl).unwrap_or_default();
                if at > cap {
                    return Err(ChaosError::Validation(format!(
                        "expiry exceeds maximum ttl of {}s",
                        max_ttl.as_secs()
                    )));
                }
            }
        }

        match self.fault_type {
            FaultType::Latency | FaultType::RedisLatency => {
                self.params.latency_ms.get_or_insert(DEFAULT_LATENCY_MS);
                self.params.jitter_ms.get_or_insert(0);
            }
            FaultType::PartialFail => {
                self.params.fail_rate.get_or_insert(DEFAULT_FAIL_RATE);
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(600);

    #[test]
    fn test_probability_range_enforced() {
        let mut spec = FaultSpec::new(FaultType::Error, FaultScope::Global).with_probability(1.5);
        assert!(spec.validate(TTL, MAX).is_err());

        let mut spec = FaultSpec::new(FaultType::Error, FaultScope::Global).with_probability(-0.1);
        assert!(spec.validate(TTL, MAX).is_err());
    }

    #[test]
    fn test_scoped_injector_requires_value() {
        let mut spec = FaultSpec::new(FaultType::Latency, FaultScope::Queue);
        assert!(spec.validate(TTL, MAX).is_err());

        let mut spec =
            FaultSpec::new(FaultType::Latency, FaultScope::Queue).with_scope_value("payments");
        spec.validate(TTL, MAX).unwrap();
    }

    #[test]
    fn test_latency_defaults_filled() {
        let mut spec = FaultSpec::new(FaultType::Latency, FaultScope::Global);
        spec.validate(TTL, MAX).unwrap();
        assert_eq!(spec.params.latency_ms, Some(DEFAULT_LATENCY_MS));
        assert_eq!(spec.params.jitter_ms, Some(0));
    }

    #[test]
    fn test_partial_fail_defaults_filled() {
        let mut spec = FaultSpec::new(FaultType::PartialFail, FaultScope::Global);
        spec.validate(TTL, MAX).unwrap();
        assert_eq!(spec.params.fail_rate, Some(DEFAULT_FAIL_RATE));
    }

    #[test]
    fn test_ttl_cap_enforced() {
        let mut spec = FaultSpec::new(FaultType::Error, FaultScope::Global)
            .with_ttl(Duration::from_secs(3_600));
        assert!(spec.validate(TTL, MAX).is_err());
    }

    #[test]
    fn test_default_ttl_applied() {
        let mut spec = FaultSpec::new(FaultType::Error, FaultScope::Global);
        spec.validate(TTL, MAX).unwrap();
        assert!(spec.expires_at.is_some());
    }

    #[test]
    fn test_scope_matching() {
        let global = FaultSpec::new(FaultType::Error, FaultScope::Global);
        assert!(global.matches(FaultScope::Queue, "payments"));
        assert!(global.matches(FaultScope::Worker, "w1"));

        let scoped =
            FaultSpec::new(FaultType::Error, FaultScope::Queue).with_scope_value("payments");
        assert!(scoped.matches(FaultScope::Queue, "payments"));
        assert!(!scoped.matches(FaultScope::Queue, "emails"));
        assert!(!scoped.matches(FaultScope::Worker, "payments"));
    }
}
