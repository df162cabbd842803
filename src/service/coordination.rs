//! Shared handle to the coordinator used by the HTTP layer and background
//! tasks
//!
//! Mutations run one at a time under the write guard and are persisted before
//! the guard is released, so a reader never sees state that is not on its way
//! to disk.

use crate::coordinator::Coordinator;
use crate::error::{CoordinationError, Result};
use crate::history::Correction;
use crate::metrics::{MetricsCollector, OperationOutcome};
use crate::persistence::StatePersister;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Whether an operation's return value means the state changed
pub trait OperationResult {
    fn applied(&self) -> bool;
}

impl OperationResult for bool {
    fn applied(&self) -> bool {
        *self
    }
}

impl<T> OperationResult for Option<T> {
    fn applied(&self) -> bool {
        self.is_some()
    }
}

impl OperationResult for Correction {
    fn applied(&self) -> bool {
        true
    }
}

/// Classify a failed operation for metrics and logging
pub fn outcome_of_error(error: &anyhow::Error) -> OperationOutcome {
    match error.downcast_ref::<CoordinationError>() {
        Some(e) if e.is_validation() => OperationOutcome::Invalid,
        _ => OperationOutcome::Failed,
    }
}

/// Cloneable handle to the running coordinator
#[derive(Clone)]
pub struct CoordinationService {
    coordinator: Arc<RwLock<Coordinator>>,
    persister: Arc<dyn StatePersister>,
    metrics: Arc<MetricsCollector>,
    is_running: Arc<RwLock<bool>>,
    last_persist_ok: Arc<AtomicBool>,
    started_at: Instant,
}

impl CoordinationService {
    pub fn new(
        coordinator: Coordinator,
        persister: Arc<dyn StatePersister>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            coordinator: Arc::new(RwLock::new(coordinator)),
            persister,
            metrics,
            is_running: Arc::new(RwLock::new(false)),
            last_persist_ok: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
        }
    }

    pub fn coordinator(&self) -> Arc<RwLock<Coordinator>> {
        self.coordinator.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    /// Whether the most recent persistence attempt succeeded
    pub fn last_persist_ok(&self) -> bool {
        self.last_persist_ok.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Run a read-only query against the coordinator
    pub async fn read<T>(&self, f: impl FnOnce(&Coordinator) -> T) -> T {
        let coordinator = self.coordinator.read().await;
        f(&*coordinator)
    }

    /// Run a mutation. Applied mutations are persisted while the write guard
    /// is still held; a persistence failure is logged and counted but does
    /// not undo the in-memory change.
    pub async fn mutate<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: OperationResult,
        F: FnOnce(&mut Coordinator) -> Result<T>,
    {
        let timer = self.metrics.start_timer();
        let mut coordinator = self.coordinator.write().await;
        let result = f(&mut *coordinator);

        let outcome = match &result {
            Ok(value) if value.applied() => OperationOutcome::Applied,
            Ok(_) => OperationOutcome::Rejected,
            Err(e) => outcome_of_error(e),
        };

        if outcome == OperationOutcome::Applied {
            self.persist_locked(&coordinator).await;
            match coordinator.overview() {
                Ok(overview) => self.metrics.update_from_overview(&overview),
                Err(e) => warn!("Failed to refresh metrics after {}: {}", operation, e),
            }
        }
        drop(coordinator);

        self.metrics
            .record_operation(operation, outcome, timer.stop());
        match (&result, outcome) {
            (Err(e), OperationOutcome::Invalid) => debug!("Rejected {}: {}", operation, e),
            (Err(e), _) => error!("Operation {} failed: {}", operation, e),
            (Ok(_), OperationOutcome::Rejected) => debug!("Operation {} changed nothing", operation),
            _ => {}
        }

        result
    }

    /// Recompute every cached estimate (the remaining budget shrinks with time)
    pub async fn refresh_estimates(&self) -> Result<()> {
        let mut coordinator = self.coordinator.write().await;
        coordinator.refresh_estimates()?;
        let overview = coordinator.overview()?;
        self.metrics.update_from_overview(&overview);
        Ok(())
    }

    /// Persist the current state
    pub async fn persist(&self) -> Result<()> {
        let coordinator = self.coordinator.read().await;
        let timer = self.metrics.start_timer();
        let result = match coordinator.snapshot() {
            Ok(snapshot) => self.persister.persist(&snapshot).await,
            Err(e) => Err(e),
        };
        self.note_persistence(result.is_ok(), timer.stop());
        result
    }

    async fn persist_locked(&self, coordinator: &Coordinator) {
        let timer = self.metrics.start_timer();
        let result = match coordinator.snapshot() {
            Ok(snapshot) => self.persister.persist(&snapshot).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!("Failed to persist coordinator state: {:#}", e);
        }
        self.note_persistence(result.is_ok(), timer.stop());
    }

    fn note_persistence(&self, success: bool, duration: Duration) {
        self.last_persist_ok.store(success, Ordering::SeqCst);
        self.metrics.record_persistence(success, duration);
    }
}
