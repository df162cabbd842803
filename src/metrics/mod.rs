//! Metrics and monitoring for the coordination service

pub mod collector;

pub use collector::{
    HistoryMetrics, MetricsCollector, MetricsTimer, OperationOutcome, PerformanceMetrics,
    ServiceMetrics, TableMetrics,
};
