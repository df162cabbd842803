//! Service duration estimation
//!
//! Statistics over completed services feed an estimator that predicts the
//! duration of each table's next service under the event's time budget.

pub mod estimator;
pub mod statistics;

// Re-export commonly used types
pub use estimator::{DurationEstimator, EstimateInput, EstimatorConfig, HistoricalDurationEstimator};
pub use statistics::DurationStats;
