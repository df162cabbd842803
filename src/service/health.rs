//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the coordination
//! service, including readiness and liveness probes.

use crate::service::coordination::CoordinationService;
use crate::types::TableStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub tables: usize,
    /// Entities waiting across all queues
    pub queued_entities: usize,
    pub serving_tables: usize,
    pub calling_tables: usize,
    pub operation_counter: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(service: &CoordinationService) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(service).await,
            Self::check_coordinator(service).await,
            Self::check_persistence(service),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(&check.status));

        let stats = Self::gather_service_stats(service).await;

        Ok(HealthCheck {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(service: &CoordinationService) -> Result<HealthStatus> {
        if service.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(service: &CoordinationService) -> Result<HealthStatus> {
        if !service.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let coordinator = Self::check_coordinator(service).await.status;
        Ok(coordinator.combine(&Self::check_persistence(service).status))
    }

    async fn check_service_running(service: &CoordinationService) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if service.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The coordinator answers and its history lock is intact
    async fn check_coordinator(service: &CoordinationService) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match service.coordinator().try_read() {
            Ok(coordinator) => match coordinator.operation_counter() {
                Ok(_) => (HealthStatus::Healthy, None),
                Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
            },
            Err(_) => (
                HealthStatus::Degraded,
                Some("Coordinator busy with a mutation".to_string()),
            ),
        };

        ComponentCheck {
            name: "coordinator".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_persistence(service: &CoordinationService) -> ComponentCheck {
        let (status, message) = if service.last_persist_ok() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Last state persistence failed".to_string()),
            )
        };

        ComponentCheck {
            name: "persistence".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(service: &CoordinationService) -> ServiceStats {
        let uptime_seconds = service.uptime().as_secs();
        let coordinator = service.coordinator();
        let coordinator = coordinator.read().await;

        let operation_counter = coordinator.operation_counter().unwrap_or_else(|e| {
            debug!("Failed to read operation counter for health check: {}", e);
            0
        });
        let count_status = |status: TableStatus| {
            coordinator
                .tables()
                .iter()
                .filter(|t| t.status() == status)
                .count()
        };

        ServiceStats {
            tables: coordinator.tables().len(),
            queued_entities: coordinator.tables().iter().map(|t| t.queue().len()).sum(),
            serving_tables: count_status(TableStatus::Serving),
            calling_tables: count_status(TableStatus::Calling),
            operation_counter,
            uptime_seconds,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
