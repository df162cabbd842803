//! Summary statistics over service durations
//!
//! Running sums are kept so the estimator and the stats endpoint can read
//! mean, spread and extremes without re-walking the history.

use serde::{Deserialize, Serialize};

/// Statistics for the services completed at one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    /// Number of samples collected
    pub sample_count: u64,
    /// Sum of all durations (for calculating mean)
    pub sum_seconds: f64,
    /// Sum of squared durations (for calculating variance)
    pub sum_squared_seconds: f64,
    /// Shortest duration observed
    pub min_seconds: f64,
    /// Longest duration observed
    pub max_seconds: f64,
}

impl DurationStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self {
            sample_count: 0,
            sum_seconds: 0.0,
            sum_squared_seconds: 0.0,
            min_seconds: f64::INFINITY,
            max_seconds: 0.0,
        }
    }

    /// Build statistics from a sequence of durations in seconds
    pub fn from_durations<I>(durations: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut stats = Self::new();
        for duration in durations {
            stats.add_sample(duration as f64);
        }
        stats
    }

    /// Add a new duration sample
    pub fn add_sample(&mut self, seconds: f64) {
        self.sample_count += 1;
        self.sum_seconds += seconds;
        self.sum_squared_seconds += seconds * seconds;
        self.min_seconds = self.min_seconds.min(seconds);
        self.max_seconds = self.max_seconds.max(seconds);
    }

    /// Plain arithmetic mean, zero when empty
    pub fn mean(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.sum_seconds / self.sample_count as f64
    }

    /// Population standard deviation
    pub fn standard_deviation(&self) -> f64 {
        if self.sample_count <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let variance = (self.sum_squared_seconds / self.sample_count as f64) - (mean * mean);
        variance.max(0.0).sqrt()
    }

    /// Shortest duration, zero when empty
    pub fn min(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.min_seconds
        }
    }

    pub fn max(&self) -> f64 {
        self.max_seconds
    }

    pub fn has_sufficient_samples(&self, min_samples: u64) -> bool {
        self.sample_count >= min_samples
    }
}

impl Default for DurationStats {
    fn default() -> Self {
        Self::new()
    }
}
