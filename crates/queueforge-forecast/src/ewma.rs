//! Exponentially weighted moving average forecaster

use crate::storage::DataPoint;
use crate::{ForecastError, Forecaster, ForecastResult, MetricKind, Result};
use serde::{Deserialize, Serialize};

/// z-score for a confidence level; unknown levels fall back to 95%
fn z_score(confidence: f64) -> f64 {
    if (confidence - 0.90).abs() < 1e-9 {
        1.645
    } else if (confidence - 0.95).abs() < 1e-9 {
        1.96
    } else if (confidence - 0.99).abs() < 1e-9 {
        2.576
    } else {
        1.96
    }
}

/// EWMA model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwmaConfig {
    /// Smoothing factor in (0, 1)
    pub alpha: f64,
    /// Adapt alpha to recent prediction error
    pub auto_adjust: bool,
    /// Observations required before forecasting
    pub min_observations: usize,
    /// Confidence level for the bounds (0.90 / 0.95 / 0.99)
    pub confidence_interval: f64,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            auto_adjust: true,
            min_observations: 5,
            confidence_interval: 0.95,
        }
    }
}

impl EwmaConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ForecastError::Config {
                field: "ewma.alpha",
                reason: format!("{} out of range (0, 1)", self.alpha),
            });
        }
        if self.min_observations == 0 {
            return Err(ForecastError::Config {
                field: "ewma.min_observations",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.confidence_interval) {
            return Err(ForecastError::Config {
                field: "ewma.confidence_interval",
                reason: format!("{} out of range (0, 1)", self.confidence_interval),
            });
        }
        Ok(())
    }
}

/// Single-smoothing model: flat point forecast with widening bounds
pub struct EwmaForecaster {
    config: EwmaConfig,
    alpha: f64,
    level: Option<f64>,
    variance: f64,
    observations: usize,
    abs_error_sum: f64,
    abs_value_sum: f64,
}

const ALPHA_FLOOR: f64 = 0.1;
const ALPHA_CEIL: f64 = 0.5;

impl EwmaForecaster {
    /// Create a model; configuration errors are fatal here
    pub fn new(config: EwmaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            alpha: config.alpha,
            config,
            level: None,
            variance: 0.0,
            observations: 0,
            abs_error_sum: 0.0,
            abs_value_sum: 0.0,
        })
    }

    /// Current smoothed level, once seeded
    pub fn level(&self) -> Option<f64> {
        self.level
    }

    /// Current (possibly auto-adjusted) alpha
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Forecaster for EwmaForecaster {
    fn update(&mut self, point: &DataPoint) {
        self.observations += 1;
        self.abs_value_sum += point.value.abs();

        let Some(level) = self.level else {
            self.level = Some(point.value);
            return;
        };

        let error = point.value - level;
        self.abs_error_sum += error.abs();
        self.variance = (1.0 - self.alpha) * self.variance + self.alpha * error * error;

        if self.config.auto_adjust {
            let normalized = error.abs() / level.abs().max(1e-9);
            if normalized > 0.3 {
                self.alpha = (self.alpha * 1.15).min(ALPHA_CEIL);
            } else if normalized < 0.1 {
                self.alpha = (self.alpha * 0.95).max(ALPHA_FLOOR);
            }
        }

        self.level = Some(level + self.alpha * error);
    }

    fn forecast(&self, metric: MetricKind, horizon: usize) -> Result<ForecastResult> {
        if self.observations < self.config.min_observations {
            return Err(ForecastError::NotEnoughData {
                have: self.observations,
                need: self.config.min_observations,
            });
        }
        let level = self.level.unwrap_or(0.0);
        let sigma = self.variance.sqrt();
        let z = z_score(self.config.confidence_interval);

        let mut points = Vec::with_capacity(horizon);
        let mut upper = Vec::with_capacity(horizon);
        let mut lower = Vec::with_capacity(horizon);
        for i in 0..horizon {
            let spread = z * sigma * ((i + 1) as f64).sqrt();
            points.push(level);
            upper.push(level + spread);
            let low = level - spread;
            lower.push(if metric.non_negative() { low.max(0.0) } else { low });
        }

        Ok(ForecastResult {
            points,
            upper_bounds: upper,
            lower_bounds: lower,
            confidence: self.config.confidence_interval,
            model_used: "ewma".to_string(),
            horizon_minutes: horizon,
            metric,
        })
    }

    fn accuracy(&self) -> Option<f64> {
        if self.observations < 2 || self.abs_value_sum == 0.0 {
            return None;
        }
        Some((1.0 - self.abs_error_sum / self.abs_value_sum).clamp(0.0, 1.0))
    }

    fn configuration(&self) -> serde_json::Value {
        serde_json::json!({
            "model": "ewma",
            "alpha": self.alpha,
            "auto_adjust": self.config.auto_adjust,
            "min_observations": self.config.min_observations,
            "confidence_interval": self.config.confidence_interval,
        })
    }

    fn ready(&self) -> bool {
        self.observations >= self.config.min_observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(model: &mut EwmaForecaster, values: &[f64]) {
        for value in values {
            model.update(&DataPoint::now(*value));
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = EwmaConfig::default();
        config.alpha = 1.0;
        assert!(config.validate().is_err());
        config.alpha = 0.0;
        assert!(config.validate().is_err());
        assert!(EwmaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_observations_gate() {
        let mut model = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        feed(&mut model, &[10.0, 11.0]);
        let err = model.forecast(MetricKind::Backlog, 3).unwrap_err();
        assert!(matches!(err, ForecastError::NotEnoughData { have: 2, need: 5 }));
    }

    #[test]
    fn test_constant_series_flat_forecast() {
        let mut config = EwmaConfig::default();
        config.auto_adjust = false;
        let mut model = EwmaForecaster::new(config).unwrap();
        feed(&mut model, &[50.0; 10]);

        let forecast = model.forecast(MetricKind::Backlog, 4).unwrap();
        assert_eq!(forecast.points, vec![50.0; 4]);
        // Zero variance: bounds collapse onto the point forecast
        assert_eq!(forecast.upper_bounds, forecast.points);
        assert_eq!(forecast.lower_bounds, forecast.points);
    }

    #[test]
    fn test_bounds_ordering_and_clamp() {
        let mut model = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        feed(&mut model, &[1.0, 9.0, 2.0, 8.0, 1.5, 9.5, 2.5]);

        let forecast = model.forecast(MetricKind::Backlog, 6).unwrap();
        for i in 0..6 {
            assert!(forecast.lower_bounds[i] <= forecast.points[i]);
            assert!(forecast.points[i] <= forecast.upper_bounds[i]);
            assert!(forecast.lower_bounds[i] >= 0.0);
        }
        // Bounds widen with the horizon
        let first = forecast.upper_bounds[0] - forecast.lower_bounds[0];
        let last = forecast.upper_bounds[5] - forecast.lower_bounds[5];
        assert!(last > first);
    }

    #[test]
    fn test_trend_tracking() {
        let mut model = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        let ascending: Vec<f64> = (1..=10).map(|i| (i * 180) as f64 + 100.0).collect();
        feed(&mut model, &ascending);

        // Level lags the series but sits well above the early values
        let level = model.level().unwrap();
        assert!(level > 1_000.0, "level {}", level);
        let forecast = model.forecast(MetricKind::Backlog, 4).unwrap();
        assert!(forecast.points.iter().all(|p| *p > 1_000.0));
    }

    #[test]
    fn test_auto_adjust_bounds_alpha() {
        let mut model = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        // Wild swings push alpha toward the ceiling
        for i in 0..50 {
            model.update(&DataPoint::now(if i % 2 == 0 { 1.0 } else { 100.0 }));
        }
        assert!(model.alpha() <= ALPHA_CEIL + 1e-9);

        let mut steady = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        for _ in 0..200 {
            steady.update(&DataPoint::now(10.0));
        }
        assert!(steady.alpha() >= ALPHA_FLOOR - 1e-9);
    }

    #[test]
    fn test_accuracy_improves_on_stable_series() {
        let mut model = EwmaForecaster::new(EwmaConfig::default()).unwrap();
        feed(&mut model, &[100.0; 20]);
        let accuracy = model.accuracy().unwrap();
        assert!(accuracy > 0.95, "accuracy {}", accuracy);
    }

    #[test]
    fn test_z_score_lookup() {
        assert_eq!(z_score(0.90), 1.645);
        assert_eq!(z_score(0.95), 1.96);
        assert_eq!(z_score(0.99), 2.576);
        assert_eq!(z_score(0.42), 1.96);
    }
}
