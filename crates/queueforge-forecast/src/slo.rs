//! SLO error-budget tracking and burn projection

use crate::ForecastResult;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Minutes in the weekly burn window
pub const WEEKLY_WINDOW: usize = 7 * 24 * 60;
/// Minutes in the monthly burn window
pub const MONTHLY_WINDOW: usize = 30 * 24 * 60;

/// Budget state at evaluation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloBudget {
    /// Availability target (e.g. 0.999)
    pub target: f64,
    /// Fraction of the weekly budget consumed right now
    pub current_burn: f64,
    /// Weekly burn rate (mean error rate / budget)
    pub weekly_burn_rate: f64,
    /// Monthly burn rate
    pub monthly_burn_rate: f64,
    /// Fraction of the weekly budget still available
    pub remaining_budget: f64,
    /// Burn rate after appending the forecast to the weekly window
    pub projected_burn: f64,
    /// Time until the budget exhausts at the projected pace
    pub time_to_exhaustion: Option<Duration>,
}

/// Rolling error-rate windows against an availability target
pub struct SloTracker {
    target: f64,
    budget: f64,
    weekly: VecDeque<f64>,
    monthly: VecDeque<f64>,
}

impl SloTracker {
    /// Create a tracker for an availability target in (0, 1)
    pub fn new(target: f64) -> Self {
        let target = target.clamp(0.0, 0.999_999);
        Self {
            target,
            budget: (1.0 - target).max(1e-9),
            weekly: VecDeque::with_capacity(1_024),
            monthly: VecDeque::with_capacity(1_024),
        }
    }

    /// Availability target
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Record one error-rate observation (one per minute expected)
    pub fn record(&mut self, error_rate: f64) {
        let error_rate = error_rate.clamp(0.0, 1.0);
        if self.weekly.len() >= WEEKLY_WINDOW {
            self.weekly.pop_front();
        }
        self.weekly.push_back(error_rate);
        if self.monthly.len() >= MONTHLY_WINDOW {
            self.monthly.pop_front();
        }
        self.monthly.push_back(error_rate);
    }

    fn mean(window: &VecDeque<f64>) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    /// Weekly burn rate: mean error rate over budget
    pub fn weekly_burn_rate(&self) -> f64 {
        Self::mean(&self.weekly) / self.budget
    }

    /// Monthly burn rate
    pub fn monthly_burn_rate(&self) -> f64 {
        Self::mean(&self.monthly) / self.budget
    }

    /// Project budget burn by appending a forecast to the weekly window
    pub fn project_budget_burn(&self, forecast: &ForecastResult) -> SloBudget {
        let current = self.weekly_burn_rate();

        let mut projected_window: VecDeque<f64> = self.weekly.clone();
        for value in &forecast.points {
            if projected_window.len() >= WEEKLY_WINDOW {
                projected_window.pop_front();
            }
            projected_window.push_back(value.clamp(0.0, 1.0));
        }
        let projected = Self::mean(&projected_window) / self.budget;

        let horizon = forecast.points.len().max(1) as f64;
        let slope_per_minute = (projected - current) / horizon;
        let time_to_exhaustion = if projected < 1.0 && slope_per_minute > 0.0 {
            let minutes = (1.0 - projected) / slope_per_minute;
            Some(Duration::from_secs_f64(minutes * 60.0))
        } else if projected >= 1.0 {
            Some(Duration::ZERO)
        } else {
            None
        };

        SloBudget {
            target: self.target,
            current_burn: current,
            weekly_burn_rate: current,
            monthly_burn_rate: self.monthly_burn_rate(),
            remaining_budget: (1.0 - current).max(0.0),
            projected_burn: projected,
            time_to_exhaustion,
        }
    }
}
