//! Holt-Winters triple exponential smoothing

use crate::storage::DataPoint;
use crate::{ForecastError, Forecaster, ForecastResult, MetricKind, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Seasonal composition method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalMethod {
    /// Season adds to the trend line
    Additive,
    /// Season multiplies the trend line
    Multiplicative,
}

/// Holt-Winters model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwConfig {
    /// Level smoothing factor in (0, 1)
    pub alpha: f64,
    /// Trend smoothing factor in (0, 1)
    pub beta: f64,
    /// Seasonal smoothing factor in (0, 1)
    pub gamma: f64,
    /// Observations per season
    pub season_length: usize,
    /// Seasonal composition method
    pub method: SeasonalMethod,
    /// Re-detect the season length by autocorrelation
    pub auto_detect_season: bool,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            beta: 0.1,
            gamma: 0.1,
            season_length: 60,
            method: SeasonalMethod::Additive,
            auto_detect_season: false,
        }
    }
}

impl HwConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("holt_winters.alpha", self.alpha),
            ("holt_winters.beta", self.beta),
            ("holt_winters.gamma", self.gamma),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ForecastError::Config {
                    field,
                    reason: format!("{} out of range (0, 1)", value),
                });
            }
        }
        if self.season_length < 2 {
            return Err(ForecastError::Config {
                field: "holt_winters.season_length",
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}

/// Autocorrelation season search bounds and acceptance threshold
const SEASON_SEARCH_MIN: usize = 2;
const SEASON_SEARCH_MAX: usize = 48;
const SEASON_ACF_THRESHOLD: f64 = 0.7;
/// How often (in observations) the season detector re-runs
const SEASON_DETECT_EVERY: usize = 100;
/// History kept for (re)initialization and season detection
const HISTORY_CAP: usize = 1_024;

/// Triple-smoothing model with level, trend, and per-slot seasonals
pub struct HoltWintersForecaster {
    config: HwConfig,
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    initialized: bool,
    history: Vec<f64>,
    variance: f64,
    observations: usize,
    step: usize,
    abs_error_sum: f64,
    abs_value_sum: f64,
}

impl HoltWintersForecaster {
    /// Create a model; configuration errors are fatal here
    pub fn new(config: HwConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            seasonal: vec![seasonal_identity(config.method); config.season_length],
            level: 0.0,
            trend: 0.0,
            initialized: false,
            history: Vec::new(),
            variance: 0.0,
            observations: 0,
            step: 0,
            abs_error_sum: 0.0,
            abs_value_sum: 0.0,
            config,
        })
    }

    /// Current season length
    pub fn season_length(&self) -> usize {
        self.config.season_length
    }

    /// Whether the model has been seeded from two full seasons
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Seed level, trend, and seasonals from the first two seasons
    fn initialize(&mut self) {
        let m = self.config.season_length;
        let season_one = &self.history[0..m];
        let season_two = &self.history[m..2 * m];
        let mean_one: f64 = season_one.iter().sum::<f64>() / m as f64;
        let mean_two: f64 = season_two.iter().sum::<f64>() / m as f64;

        self.level = mean_one;
        self.trend = (mean_two - mean_one) / m as f64;

        self.seasonal = (0..m)
            .map(|i| {
                let average = (season_one[i] + season_two[i]) / 2.0;
                match self.config.method {
                    SeasonalMethod::Additive => average - (mean_one + mean_two) / 2.0,
                    SeasonalMethod::Multiplicative => {
                        let base = ((mean_one + mean_two) / 2.0).max(1e-9);
                        (average / base).max(1e-9)
                    }
                }
            })
            .collect();

        self.initialized = true;
        self.step = 0;
        debug!(
            season_length = m,
            level = self.level,
            trend = self.trend,
            "holt-winters initialized"
        );

        // Replay observations beyond the seed window through the recurrences
        let rest: Vec<f64> = self.history[2 * m..].to_vec();
        for value in rest {
            self.smooth(value);
        }
    }

    fn one_step_ahead(&self) -> f64 {
        let idx = self.step % self.config.season_length;
        match self.config.method {
            SeasonalMethod::Additive => self.level + self.trend + self.seasonal[idx],
            SeasonalMethod::Multiplicative => (self.level + self.trend) * self.seasonal[idx],
        }
    }

    fn smooth(&mut self, value: f64) {
        let m = self.config.season_length;
        let idx = self.step % m;
        let (alpha, beta, gamma) = (self.config.alpha, self.config.beta, self.config.gamma);

        let error = value - self.one_step_ahead();
        self.abs_error_sum += error.abs();
        self.variance = (1.0 - alpha) * self.variance + alpha * error * error;

        let previous_level = self.level;
        match self.config.method {
            SeasonalMethod::Additive => {
                self.level =
                    alpha * (value - self.seasonal[idx]) + (1.0 - alpha) * (self.level + self.trend);
                self.trend = beta * (self.level - previous_level) + (1.0 - beta) * self.trend;
                self.seasonal[idx] =
                    gamma * (value - self.level) + (1.0 - gamma) * self.seasonal[idx];
            }
            SeasonalMethod::Multiplicative => {
                let denominator = self.seasonal[idx].max(1e-9);
                self.level =
                    alpha * (value / denominator) + (1.0 - alpha) * (self.level + self.trend);
                self.trend = beta * (self.level - previous_level) + (1.0 - beta) * self.trend;
                self.seasonal[idx] =
                    gamma * (value / self.level.max(1e-9)) + (1.0 - gamma) * self.seasonal[idx];
            }
        }
        self.step += 1;
    }

    /// Autocorrelation at a lag over the retained history
    fn autocorrelation(&self, lag: usize) -> f64 {
        let values = &self.history;
        let n = values.len();
        if n <= lag + 1 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let denominator: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        if denominator == 0.0 {
            return 0.0;
        }
        let numerator: f64 =
            (0..n - lag).map(|i| (values[i] - mean) * (values[i + lag] - mean)).sum();
        numerator / denominator
    }

    /// Search 2..=48 for a stronger season; reinitialize when one is found
    fn detect_season(&mut self) {
        let upper = SEASON_SEARCH_MAX.min(self.history.len() / 2);
        let mut best: Option<(usize, f64)> = None;
        for lag in SEASON_SEARCH_MIN..=upper {
            let acf = self.autocorrelation(lag);
            if acf > SEASON_ACF_THRESHOLD
                && best.map_or(true, |(_, best_acf)| acf > best_acf)
            {
                best = Some((lag, acf));
            }
        }
        if let Some((lag, acf)) = best {
            if lag != self.config.season_length && self.history.len() >= 2 * lag {
                info!(old = self.config.season_length, new = lag, acf, "season length re-detected");
                self.config.season_length = lag;
                self.initialize();
            }
        }
    }
}

fn seasonal_identity(method: SeasonalMethod) -> f64 {
    match method {
        SeasonalMethod::Additive => 0.0,
        SeasonalMethod::Multiplicative => 1.0,
    }
}

impl Forecaster for HoltWintersForecaster {
    fn update(&mut self, point: &DataPoint) {
        self.observations += 1;
        self.abs_value_sum += point.value.abs();
        if self.history.len() < HISTORY_CAP {
            self.history.push(point.value);
        }

        if !self.initialized {
            if self.history.len() >= 2 * self.config.season_length {
                self.initialize();
            }
            return;
        }

        self.smooth(point.value);

        if self.config.auto_detect_season && self.observations % SEASON_DETECT_EVERY == 0 {
            self.detect_season();
        }
    }

    fn forecast(&self, metric: MetricKind, horizon: usize) -> Result<ForecastResult> {
        if !self.initialized {
            return Err(ForecastError::NotEnoughData {
                have: self.history.len(),
                need: 2 * self.config.season_length,
            });
        }

        let m = self.config.season_length;
        let sigma = self.variance.sqrt();
        let mut points = Vec::with_capacity(horizon);
        let mut upper = Vec::with_capacity(horizon);
        let mut lower = Vec::with_capacity(horizon);

        for i in 0..horizon {
            let idx = (self.step + i) % m;
            let base = self.level + (i + 1) as f64 * self.trend;
            let mut value = match self.config.method {
                SeasonalMethod::Additive => base + self.seasonal[idx],
                SeasonalMethod::Multiplicative => base * self.seasonal[idx],
            };
            if metric.non_negative() {
                value = value.max(0.0);
            }
            let spread = 1.96 * sigma * ((i + 1) as f64).sqrt();
            points.push(value);
            upper.push(value + spread);
            let low = value - spread;
            lower.push(if metric.non_negative() { low.max(0.0) } else { low });
        }

        Ok(ForecastResult {
            points,
            upper_bounds: upper,
            lower_bounds: lower,
            confidence: 0.95,
            model_used: "holt_winters".to_string(),
            horizon_minutes: horizon,
            metric,
        })
    }

    fn accuracy(&self) -> Option<f64> {
        if !self.initialized || self.abs_value_sum == 0.0 {
            return None;
        }
        Some((1.0 - self.abs_error_sum / self.abs_value_sum).clamp(0.0, 1.0))
    }

    fn configuration(&self) -> serde_json::Value {
        serde_json::json!({
            "model": "holt_winters",
            "alpha": self.config.alpha,
            "beta": self.config.beta,
            "gamma": self.config.gamma,
            "season_length": self.config.season_length,
            "method": self.config.method,
            "auto_detect_season": self.config.auto_detect_season,
        })
    }

    fn ready(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(season: usize, method: SeasonalMethod) -> HwConfig {
        HwConfig {
            season_length: season,
            method,
            ..Default::default()
        }
    }

    fn feed(model: &mut HoltWintersForecaster, values: &[f64]) {
        for value in values {
            model.update(&DataPoint::now(*value));
        }
    }

    /// Two repeats of a 4-slot seasonal pattern
    fn seasonal_series(repeats: usize) -> Vec<f64> {
        let pattern = [10.0, 20.0, 30.0, 20.0];
        (0..repeats).flat_map(|_| pattern).collect()
    }

    #[test]
    fn test_config_validation() {
        let mut bad = HwConfig::default();
        bad.alpha = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = HwConfig::default();
        bad.season_length = 1;
        assert!(bad.validate().is_err());

        assert!(HwConfig::default().validate().is_ok());
    }

    #[test]
    fn test_requires_two_seasons() {
        let mut model =
            HoltWintersForecaster::new(config(4, SeasonalMethod::Additive)).unwrap();
        feed(&mut model, &seasonal_series(1));
        assert!(!model.initialized());
        assert!(model.forecast(MetricKind::Backlog, 4).is_err());

        feed(&mut model, &seasonal_series(1));
        assert!(model.initialized());
        assert!(model.forecast(MetricKind::Backlog, 4).is_ok());
    }

    #[test]
    fn test_additive_tracks_seasonal_shape() {
        let mut model =
            HoltWintersForecaster::new(config(4, SeasonalMethod::Additive)).unwrap();
        feed(&mut model, &seasonal_series(6));

        let forecast = model.forecast(MetricKind::Backlog, 4).unwrap();
        // The 30-peak slot forecasts higher than the 10-trough slot
        let max = forecast.points.iter().cloned().fold(f64::MIN, f64::max);
        let min = forecast.points.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max - min > 10.0, "forecast lost the seasonal shape: {:?}", forecast.points);
    }

    #[test]
    fn test_multiplicative_positive_forecasts() {
        let mut model =
            HoltWintersForecaster::new(config(4, SeasonalMethod::Multiplicative)).unwrap();
        feed(&mut model, &seasonal_series(6));

        let forecast = model.forecast(MetricKind::Backlog, 8).unwrap();
        assert!(forecast.points.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn test_bounds_bracket_points() {
        let mut model =
            HoltWintersForecaster::new(config(4, SeasonalMethod::Additive)).unwrap();
        feed(&mut model, &seasonal_series(8));

        let forecast = model.forecast(MetricKind::Backlog, 6).unwrap();
        for i in 0..6 {
            assert!(forecast.lower_bounds[i] <= forecast.points[i]);
            assert!(forecast.points[i] <= forecast.upper_bounds[i]);
            assert!(forecast.lower_bounds[i] >= 0.0);
        }
    }

    #[test]
    fn test_trend_projection() {
        // Seasonal pattern riding a steady upward trend
        let mut model =
            HoltWintersForecaster::new(config(4, SeasonalMethod::Additive)).unwrap();
        let values: Vec<f64> = (0..40)
            .map(|i| {
                let pattern = [10.0, 20.0, 30.0, 20.0][i % 4];
                pattern + i as f64 * 2.0
            })
            .collect();
        feed(&mut model, &values);

        let forecast = model.forecast(MetricKind::Backlog, 8).unwrap();
        let last_observed = values[values.len() - 1];
        // Late-horizon forecasts continue above the last observation
        assert!(
            forecast.points[7] > last_observed - 10.0,
            "trend lost: {:?} vs {}",
            forecast.points,
            last_observed
        );
    }

    #[test]
    fn test_autocorrelation_finds_period() {
        let mut model = HoltWintersForecaster::new(HwConfig {
            season_length: 7,
            auto_detect_season: false,
            ..Default::default()
        })
        .unwrap();
        // Period-4 signal
        for _ in 0..30 {
            feed(&mut model, &[10.0, 20.0, 30.0, 20.0]);
        }
        let at_period = model.autocorrelation(4);
        let off_period = model.autocorrelation(3);
        assert!(at_period > SEASON_ACF_THRESHOLD, "acf(4) = {}", at_period);
        assert!(at_period > off_period);
    }

    #[test]
    fn test_season_redetection_reinitializes() {
        let mut model = HoltWintersForecaster::new(HwConfig {
            season_length: 6,
            auto_detect_season: true,
            ..Default::default()
        })
        .unwrap();
        // 100+ observations of a period-4 signal trigger the detector
        for _ in 0..30 {
            feed(&mut model, &[10.0, 20.0, 30.0, 20.0]);
        }
        assert_eq!(model.season_length(), 4);
        assert!(model.initialized());
    }
}
