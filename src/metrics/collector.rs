//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the table coordination service
//! using Prometheus metrics.

use crate::coordinator::CoordinatorOverview;
use crate::history::Correction;
use crate::types::TableStatus;
use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a requested operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// State changed
    Applied,
    /// Illegal transition or no-op, nothing changed
    Rejected,
    /// Request failed validation
    Invalid,
    /// Internal failure
    Failed,
}

impl OperationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Applied => "applied",
            OperationOutcome::Rejected => "rejected",
            OperationOutcome::Invalid => "invalid",
            OperationOutcome::Failed => "failed",
        }
    }
}

/// Main metrics collector for the coordination service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Table and queue metrics
    table_metrics: TableMetrics,

    /// Completed service metrics
    history_metrics: HistoryMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Requested operations by kind and outcome
    pub operations_total: IntCounterVec,

    /// Current value of the change counter
    pub operation_counter: IntGauge,
}

/// Per-table metrics
#[derive(Clone)]
pub struct TableMetrics {
    /// Entities waiting at each table
    pub queue_length: IntGaugeVec,

    /// Cached estimate of each table's next service
    pub expected_duration_seconds: GaugeVec,

    /// Table status (0=idle, 1=calling, 2=serving)
    pub status: IntGaugeVec,
}

/// Metrics about completed services
#[derive(Clone)]
pub struct HistoryMetrics {
    /// Services finished per table
    pub services_completed_total: IntCounterVec,

    /// Duration of finished services
    pub service_duration_seconds: HistogramVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time spent handling coordinator operations
    pub operation_duration: HistogramVec,

    /// Time spent persisting state
    pub persistence_duration: Histogram,

    /// Failed persistence attempts
    pub persistence_failures_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let table_metrics = TableMetrics::new(&registry)?;
        let history_metrics = HistoryMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            table_metrics,
            history_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn table(&self) -> &TableMetrics {
        &self.table_metrics
    }

    pub fn history(&self) -> &HistoryMetrics {
        &self.history_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh every gauge from a coordinator overview
    pub fn update_from_overview(&self, overview: &CoordinatorOverview) {
        self.service_metrics
            .operation_counter
            .set(overview.last_update as i64);

        for entry in &overview.tables {
            let name = entry.table.name.as_str();
            self.table_metrics
                .queue_length
                .with_label_values(&[name])
                .set(entry.table.queue.len() as i64);
            self.table_metrics
                .expected_duration_seconds
                .with_label_values(&[name])
                .set(entry.expected_duration);

            let status = match entry.table.status {
                TableStatus::Idle => 0,
                TableStatus::Calling => 1,
                TableStatus::Serving => 2,
            };
            self.table_metrics
                .status
                .with_label_values(&[name])
                .set(status);
        }
    }

    /// Record a finished operation
    pub fn record_operation(&self, operation: &str, outcome: OperationOutcome, duration: Duration) {
        self.service_metrics
            .operations_total
            .with_label_values(&[operation, outcome.as_str()])
            .inc();

        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record a service that just ended at a table
    pub fn record_service_completed(&self, correction: &Correction) {
        let table = correction.table.as_str();
        self.history_metrics
            .services_completed_total
            .with_label_values(&[table])
            .inc();
        self.history_metrics
            .service_duration_seconds
            .with_label_values(&[table])
            .observe(correction.duration() as f64);
    }

    /// Record a persistence attempt
    pub fn record_persistence(&self, success: bool, duration: Duration) {
        if !success {
            self.performance_metrics.persistence_failures_total.inc();
        }
        self.performance_metrics
            .persistence_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new(
            "table_coordinator_uptime_seconds",
            "Service uptime in seconds",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "table_coordinator_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "table_coordinator_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let operations_total = IntCounterVec::new(
            Opts::new(
                "table_coordinator_operations_total",
                "Requested operations by kind and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_counter = IntGauge::new(
            "table_coordinator_operation_counter",
            "Current value of the change counter",
        )?;
        registry.register(Box::new(operation_counter.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            operations_total,
            operation_counter,
        })
    }
}

impl TableMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_length = IntGaugeVec::new(
            Opts::new(
                "table_coordinator_queue_length",
                "Entities waiting at each table",
            ),
            &["table"],
        )?;
        registry.register(Box::new(queue_length.clone()))?;

        let expected_duration_seconds = GaugeVec::new(
            Opts::new(
                "table_coordinator_expected_duration_seconds",
                "Estimated duration of the next service",
            ),
            &["table"],
        )?;
        registry.register(Box::new(expected_duration_seconds.clone()))?;

        let status = IntGaugeVec::new(
            Opts::new(
                "table_coordinator_table_status",
                "Table status (0=idle, 1=calling, 2=serving)",
            ),
            &["table"],
        )?;
        registry.register(Box::new(status.clone()))?;

        Ok(Self {
            queue_length,
            expected_duration_seconds,
            status,
        })
    }
}

impl HistoryMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let services_completed_total = IntCounterVec::new(
            Opts::new(
                "table_coordinator_services_completed_total",
                "Services finished per table",
            ),
            &["table"],
        )?;
        registry.register(Box::new(services_completed_total.clone()))?;

        let service_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "table_coordinator_service_duration_seconds",
                "Duration of finished services",
            )
            .buckets(vec![
                60.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 2700.0, 3600.0,
            ]),
            &["table"],
        )?;
        registry.register(Box::new(service_duration_seconds.clone()))?;

        Ok(Self {
            services_completed_total,
            service_duration_seconds,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "table_coordinator_operation_duration_seconds",
                "Coordinator operation duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let persistence_duration = Histogram::with_opts(
            HistogramOpts::new(
                "table_coordinator_persistence_duration_seconds",
                "State persistence time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(persistence_duration.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "table_coordinator_persistence_failures_total",
            "Failed state persistence attempts",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        Ok(Self {
            operation_duration,
            persistence_duration,
            persistence_failures_total,
        })
    }
}
