//! Expected service duration for a table's next service
//!
//! The base value is a shrinkage mean: while a table has fewer than
//! `min_sample_count` completed services, the missing samples are filled in
//! with the a-priori duration. The result is then compressed so the current
//! queue fits into the time still left in the event, and finally clamped.

use crate::error::{CoordinationError, Result};
use crate::estimate::statistics::DurationStats;
use crate::types::{BreakInterval, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for duration estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Number of services below which a-priori samples are mixed in
    pub min_sample_count: u64,
    /// Duration assumed for each missing sample
    pub a_priori_duration_seconds: f64,
    /// Lower clamp for the estimate
    pub min_duration_seconds: f64,
    /// Upper clamp for the estimate
    pub max_duration_seconds: f64,
    /// Event start (epoch seconds)
    pub event_start: Timestamp,
    /// Absolute event end (epoch seconds)
    pub event_end: Timestamp,
    /// Scheduled pauses excluded from the remaining budget
    pub breaks: Vec<BreakInterval>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_sample_count: 5,
            a_priori_duration_seconds: 20.0 * 60.0,
            min_duration_seconds: 60.0,
            max_duration_seconds: 60.0 * 60.0,
            event_start: 0,
            // No end configured: the budget never compresses the estimate
            event_end: i64::MAX / 2,
            breaks: Vec::new(),
        }
    }
}

impl EstimatorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| -> Result<()> {
            Err(CoordinationError::ConfigurationError {
                message: message.to_string(),
            }
            .into())
        };

        if self.min_sample_count == 0 {
            return fail("min_sample_count must be greater than 0");
        }
        if !self.a_priori_duration_seconds.is_finite() || self.a_priori_duration_seconds < 0.0 {
            return fail("a_priori_duration_seconds must be a non-negative number");
        }
        if self.min_duration_seconds < 0.0 {
            return fail("min_duration_seconds must be non-negative");
        }
        if self.min_duration_seconds > self.max_duration_seconds {
            return fail("min_duration_seconds must not exceed max_duration_seconds");
        }
        if self.event_end < self.event_start {
            return fail("event_end must not precede event_start");
        }
        if self.breaks.iter().any(|b| b.end < b.start) {
            return fail("every break must end after it starts");
        }

        Ok(())
    }

    /// Seconds of event time left after `now`, excluding breaks still ahead
    pub fn remaining_budget(&self, now: Timestamp) -> f64 {
        let mut budget = self
            .event_end
            .max(now)
            .saturating_sub(self.event_start.max(now)) as f64;
        for pause in &self.breaks {
            budget -= pause.remaining_after(now) as f64;
        }
        budget
    }
}

/// Everything the estimator needs to know about one table
#[derive(Debug, Clone)]
pub struct EstimateInput<'a> {
    pub history: &'a DurationStats,
    pub queue_length: usize,
    pub now: Timestamp,
}

/// Trait for estimating the duration of a table's next service
pub trait DurationEstimator: Send + Sync {
    /// Expected duration in seconds
    fn estimate(&self, input: &EstimateInput<'_>) -> f64;

    /// Get the current configuration
    fn config(&self) -> &EstimatorConfig;
}

/// Estimator backed by the table's correction history
#[derive(Debug, Clone)]
pub struct HistoricalDurationEstimator {
    config: EstimatorConfig,
}

impl HistoricalDurationEstimator {
    /// Create a new estimator
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Mean duration with missing samples filled in by the a-priori duration
    pub fn base_estimate(&self, history: &DurationStats) -> f64 {
        let min_samples = self.config.min_sample_count;
        let missing = min_samples.saturating_sub(history.sample_count);
        let total = history.sum_seconds + missing as f64 * self.config.a_priori_duration_seconds;
        let effective_samples = min_samples.max(history.sample_count);

        total / effective_samples as f64
    }

    fn clamp(&self, seconds: f64) -> f64 {
        seconds
            .max(self.config.min_duration_seconds)
            .min(self.config.max_duration_seconds)
    }
}

impl DurationEstimator for HistoricalDurationEstimator {
    fn estimate(&self, input: &EstimateInput<'_>) -> f64 {
        let mut expected = self.base_estimate(input.history);

        if input.queue_length > 0 {
            let budget = self.config.remaining_budget(input.now);
            let queue_length = input.queue_length as f64;
            if expected * queue_length > budget {
                debug!(
                    "Compressing estimate {:.1}s to fit {} queued entities into {:.0}s",
                    expected, input.queue_length, budget
                );
                expected = budget / queue_length;
            }
        }

        self.clamp(expected)
    }

    fn config(&self) -> &EstimatorConfig {
        &self.config
    }
}
