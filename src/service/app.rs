//! Main application state and service lifecycle
//!
//! `AppState` owns the coordination service, the HTTP API server and the
//! background maintenance tasks.

use crate::api::{ApiServer, ApiServerConfig};
use crate::config::{validate_config, AppConfig};
use crate::coordinator::Coordinator;
use crate::metrics::MetricsCollector;
use crate::persistence::{load_coordinator, FileStatePersister, StatePersister};
use crate::service::coordination::CoordinationService;
use crate::service::health::HealthCheck;
use crate::utils::SystemClock;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    service: CoordinationService,
    api_server: Arc<ApiServer>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Load the persisted state named in the configuration and wire up the
    /// service components
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing table-coordinator service");
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let coordinator = load_coordinator(&config, Arc::new(SystemClock)).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to load coordinator state: {:#}", e),
            }
        })?;
        let persister = Arc::new(FileStatePersister::new(config.storage.clone()));

        Self::with_coordinator(config, coordinator, persister)
    }

    /// Assemble the application around an already built coordinator
    pub fn with_coordinator(
        config: AppConfig,
        coordinator: Coordinator,
        persister: Arc<dyn StatePersister>,
    ) -> Result<Self, ServiceError> {
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        if let Ok(overview) = coordinator.overview() {
            metrics.update_from_overview(&overview);
        }

        let service = CoordinationService::new(coordinator, persister, metrics);
        let api_server = Arc::new(ApiServer::new(
            ApiServerConfig {
                host: config.service.http_host.clone(),
                port: config.service.http_port,
            },
            service.clone(),
        ));

        Ok(Self {
            config,
            service,
            api_server,
            background_tasks: Vec::new(),
        })
    }

    /// Start the HTTP API and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting table-coordinator service");

        self.service.set_running(true).await;
        self.start_api_server().await;
        self.start_background_tasks();

        info!("✅ Table-coordinator service started successfully");
        Ok(())
    }

    /// Stop serving, then persist the final state
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of table-coordinator service");

        self.service.set_running(false).await;
        self.api_server.stop();
        self.stop_background_tasks().await;

        self.service
            .persist()
            .await
            .map_err(|e| ServiceError::Persistence {
                message: format!("Failed to persist final state: {:#}", e),
            })?;

        match self.service.read(|c| c.operation_counter()).await {
            Ok(counter) => info!("Final operation counter: {}", counter),
            Err(e) => warn!("Failed to read final operation counter: {}", e),
        }
        info!("✅ Table-coordinator service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &CoordinationService {
        &self.service
    }

    pub async fn is_running(&self) -> bool {
        self.service.is_running().await
    }

    async fn start_api_server(&mut self) {
        let api_server = self.api_server.clone();
        let addr = self.config.http_addr();

        let handle = tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                error!("API server failed: {:#}", e);
            } else {
                info!("API server task completed");
            }
        });
        self.background_tasks.push(handle);

        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("✅ API server started on {}", addr);
    }

    fn start_background_tasks(&mut self) {
        let refresh_interval = self.config.estimate_refresh_interval();
        info!(
            "Starting estimate refresh task ({}s interval)...",
            refresh_interval.as_secs()
        );
        let refresh_task = {
            let service = self.service.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(refresh_interval);
                info!("Estimate refresh task started");

                while service.is_running().await {
                    interval.tick().await;
                    match service.refresh_estimates().await {
                        Ok(()) => debug!("Refreshed expected durations"),
                        Err(e) => warn!("Failed to refresh expected durations: {}", e),
                    }
                }

                info!("Estimate refresh task stopped");
            })
        };

        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );
        let health_metrics_task = {
            let service = self.service.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                info!("Health metrics task started");

                while service.is_running().await {
                    interval.tick().await;

                    let metrics = service.metrics();
                    metrics
                        .service()
                        .uptime_seconds
                        .set(service.uptime().as_secs() as i64);

                    match HealthCheck::check(&service).await {
                        Ok(health) => {
                            metrics.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics.update_component_health(
                                    &check.name,
                                    check.status.as_gauge() == 2,
                                );
                            }
                            debug!(
                                "Health check: {} - {} tables, {} queued",
                                health.status,
                                health.stats.tables,
                                health.stats.queued_entities
                            );
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(refresh_task);
        self.background_tasks.push(health_metrics_task);
        info!("2 background maintenance tasks started successfully");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableSettings;
    use crate::persistence::{dump_roster, load_table_snapshot};

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.service.http_host = "127.0.0.1".to_string();
        config.service.http_port = 0;
        config.storage.roster_path = dir.join("roster.csv");
        config.storage.history_path = dir.join("history.csv");
        config.storage.tables = vec![TableSettings {
            name: "T1".to_string(),
            path: dir.join("T1.json"),
            topic: "Combinatorics".to_string(),
            operators: vec![],
        }];
        config
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let result = AppState::new(config).await;
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_missing_roster_fails_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.service.http_port = 18080;
        let result = AppState::new(config).await;
        assert!(matches!(result, Err(ServiceError::Initialization { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.service.http_port = 18081;
        dump_roster(&["ITA".to_string()], &config.storage.roster_path, false).unwrap();

        let mut app = AppState::new(config.clone()).await.unwrap();
        app.service()
            .mutate("enqueue", |c| c.enqueue("T1", "ITA", None))
            .await
            .unwrap();
        app.shutdown().await.unwrap();

        let snapshot = load_table_snapshot(&config.storage.tables[0].path)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.queue, ["ITA"]);
        assert!(!app.is_running().await);
    }
}
