//! Table Coordinator - queue and service-duration coordination for
//! multi-table competition events
//!
//! Entities (teams) queue at service tables, get called and served, and every
//! finished service lands in a correction log that drives each table's
//! expected-duration estimate. The coordinator keeps the cross-table rules
//! (one queue per entity, one table per entity at a time) and the whole state
//! is served over HTTP and persisted to plain CSV/JSON files.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod estimate;
pub mod history;
pub mod metrics;
pub mod persistence;
pub mod service;
pub mod table;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{CoordinationError, Result};
pub use types::*;

// Re-export key components
pub use coordinator::Coordinator;
pub use estimate::{DurationEstimator, HistoricalDurationEstimator};
pub use history::{Correction, CorrectionFilter, CorrectionLog};
pub use table::ServiceTable;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
