//! Service table implementation and state machine
//!
//! A table owns the queue of entities waiting for it and moves between
//! IDLE, CALLING and SERVING. Illegal transitions are routine caller
//! mistakes: they return `false`/`None` and leave the table untouched.
//! Every successful mutation bumps the shared operation counter once and
//! recomputes the cached duration estimate.

use crate::error::{CoordinationError, Result};
use crate::estimate::{DurationEstimator, DurationStats, EstimateInput};
use crate::history::{Correction, CorrectionLog, SharedCorrectionLog};
use crate::table::snapshot::TableSnapshot;
use crate::types::{EntityId, TableName, TableStatus, Timestamp};
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable identity of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIdentity {
    pub name: TableName,
    /// Problem or topic handled at this table
    pub topic: String,
    /// People running the table
    pub operators: Vec<String>,
}

impl TableIdentity {
    pub fn new(name: impl Into<TableName>, topic: impl Into<String>, operators: Vec<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            operators,
        }
    }
}

/// Dependencies every table of a coordinator shares
#[derive(Clone)]
pub struct TableContext {
    pub history: SharedCorrectionLog,
    pub estimator: Arc<dyn DurationEstimator>,
    pub clock: Arc<dyn Clock>,
}

impl TableContext {
    pub fn new(
        history: SharedCorrectionLog,
        estimator: Arc<dyn DurationEstimator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            history,
            estimator,
            clock,
        }
    }

    pub(crate) fn read_history<R>(&self, f: impl FnOnce(&CorrectionLog) -> R) -> Result<R> {
        let history = self
            .history
            .read()
            .map_err(|_| CoordinationError::lock_poisoned("history read"))?;
        Ok(f(&history))
    }

    pub(crate) fn write_history<R>(&self, f: impl FnOnce(&mut CorrectionLog) -> R) -> Result<R> {
        let mut history = self
            .history
            .write()
            .map_err(|_| CoordinationError::lock_poisoned("history write"))?;
        Ok(f(&mut history))
    }
}

/// The service currently running at a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveService {
    pub entity: EntityId,
    pub started_at: Timestamp,
}

/// Internal state; the active service only exists while serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Idle,
    Calling,
    Serving(ActiveService),
}

impl TableState {
    pub fn status(&self) -> TableStatus {
        match self {
            TableState::Idle => TableStatus::Idle,
            TableState::Calling => TableStatus::Calling,
            TableState::Serving(_) => TableStatus::Serving,
        }
    }
}

/// A single table with its queue and state machine
pub struct ServiceTable {
    identity: TableIdentity,
    queue: Vec<EntityId>,
    state: TableState,
    expected_duration: Option<f64>,
    context: TableContext,
}

impl std::fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTable")
            .field("identity", &self.identity)
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("expected_duration", &self.expected_duration)
            .finish_non_exhaustive()
    }
}

impl ServiceTable {
    /// Create an idle table with an empty queue
    pub fn new(identity: TableIdentity, context: TableContext) -> Result<Self> {
        Self::with_state(identity, Vec::new(), TableState::Idle, context)
    }

    /// Create a table in a given state (used when restoring snapshots)
    pub fn with_state(
        identity: TableIdentity,
        queue: Vec<EntityId>,
        state: TableState,
        context: TableContext,
    ) -> Result<Self> {
        let mut table = Self {
            identity,
            queue,
            state,
            expected_duration: None,
            context,
        };
        table.recompute_estimate()?;
        Ok(table)
    }

    /// Restore a table from its persisted snapshot
    pub fn from_snapshot(
        snapshot: TableSnapshot,
        context: TableContext,
        location: &str,
    ) -> Result<Self> {
        snapshot.validate(location)?;

        let state = match snapshot.status {
            TableStatus::Idle => TableState::Idle,
            TableStatus::Calling => TableState::Calling,
            TableStatus::Serving => match (snapshot.current_entity, snapshot.current_start) {
                (Some(entity), Some(started_at)) => {
                    TableState::Serving(ActiveService { entity, started_at })
                }
                _ => {
                    return Err(CoordinationError::corrupt(
                        location,
                        "serving table without current entity and start time",
                    )
                    .into())
                }
            },
        };

        let identity = TableIdentity::new(snapshot.name, snapshot.topic, snapshot.operators);
        Self::with_state(identity, snapshot.queue, state, context)
    }

    /// Capture the full persisted shape of this table
    pub fn to_snapshot(&self) -> TableSnapshot {
        let active = self.active_service();
        TableSnapshot {
            name: self.identity.name.clone(),
            topic: self.identity.topic.clone(),
            operators: self.identity.operators.clone(),
            queue: self.queue.clone(),
            status: self.status(),
            current_entity: active.map(|a| a.entity.clone()),
            current_start: active.map(|a| a.started_at),
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn topic(&self) -> &str {
        &self.identity.topic
    }

    pub fn operators(&self) -> &[String] {
        &self.identity.operators
    }

    pub fn identity(&self) -> &TableIdentity {
        &self.identity
    }

    pub fn queue(&self) -> &[EntityId] {
        &self.queue
    }

    pub fn head(&self) -> Option<&EntityId> {
        self.queue.first()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.position_of(entity).is_some()
    }

    pub fn position_of(&self, entity: &str) -> Option<usize> {
        self.queue.iter().position(|e| e == entity)
    }

    pub fn state(&self) -> &TableState {
        &self.state
    }

    pub fn status(&self) -> TableStatus {
        self.state.status()
    }

    pub fn active_service(&self) -> Option<&ActiveService> {
        match &self.state {
            TableState::Serving(active) => Some(active),
            _ => None,
        }
    }

    /// Expected duration of the next service, computing it if never cached
    pub fn expected_duration(&self) -> Result<f64> {
        match self.expected_duration {
            Some(cached) => Ok(cached),
            None => self.compute_estimate(),
        }
    }

    pub fn cached_estimate(&self) -> Option<f64> {
        self.expected_duration
    }

    /// Recompute and cache the estimate (time passing shrinks the budget)
    pub fn refresh_estimate(&mut self) -> Result<f64> {
        self.recompute_estimate()
    }

    /// Duration statistics of the services completed here
    pub fn stats(&self) -> Result<DurationStats> {
        self.context
            .read_history(|history| history.stats_for_table(&self.identity.name))
    }

    /// Add an entity at `position` (default: last), clamped to the queue
    /// bounds. Returns false if the entity is already queued here.
    pub fn enqueue(&mut self, entity: &str, position: Option<usize>) -> Result<bool> {
        if !self.insert_at(entity, position) {
            debug!(
                "Entity '{}' already in queue at table {}",
                entity, self.identity.name
            );
            return Ok(false);
        }

        self.after_mutation()?;
        Ok(true)
    }

    /// Remove an entity from the queue. Returns whether it was queued.
    pub fn dequeue(&mut self, entity: &str) -> Result<bool> {
        if !self.remove(entity) {
            return Ok(false);
        }

        self.after_mutation()?;
        Ok(true)
    }

    /// Exchange the queue positions of two distinct queued entities
    pub fn swap(&mut self, first: &str, second: &str) -> Result<bool> {
        if first == second {
            return Ok(false);
        }
        let (Some(a), Some(b)) = (self.position_of(first), self.position_of(second)) else {
            return Ok(false);
        };

        self.queue.swap(a, b);
        self.after_mutation()?;
        Ok(true)
    }

    /// Move the head of the queue `skip_distance` places back
    pub fn skip_to_next(&mut self, skip_distance: usize) -> Result<bool> {
        let Some(head) = self.queue.first().cloned() else {
            return Ok(false);
        };

        self.remove(&head);
        let position = skip_distance.min(self.queue.len());
        self.insert_at(&head, Some(position));
        debug!(
            "Table {} skipped '{}' to position {}",
            self.identity.name, head, position
        );

        self.after_mutation()?;
        Ok(true)
    }

    /// Put an entity at the head of the queue and start calling it, unless a
    /// service is running
    pub fn call_entity(&mut self, entity: &str) -> Result<bool> {
        self.remove(entity);
        self.insert_at(entity, Some(0));
        if !matches!(self.state, TableState::Serving(_)) {
            self.state = TableState::Calling;
        }
        info!(
            "Table {} calling '{}' (status: {})",
            self.identity.name,
            entity,
            self.status()
        );

        self.after_mutation()?;
        Ok(true)
    }

    /// IDLE -> CALLING, only with somebody to call
    pub fn switch_to_calling(&mut self) -> Result<bool> {
        if self.state != TableState::Idle || self.queue.is_empty() {
            debug!(
                "Table {} cannot switch to calling from {} with {} queued",
                self.identity.name,
                self.status(),
                self.queue.len()
            );
            return Ok(false);
        }

        self.state = TableState::Calling;
        self.after_mutation()?;
        Ok(true)
    }

    /// CALLING -> IDLE
    pub fn switch_to_idle(&mut self) -> Result<bool> {
        if self.state != TableState::Calling {
            return Ok(false);
        }

        self.state = TableState::Idle;
        self.after_mutation()?;
        Ok(true)
    }

    /// Begin serving `entity`; refused while another service is running
    pub fn start_service(&mut self, entity: &str) -> Result<bool> {
        if let TableState::Serving(active) = &self.state {
            debug!(
                "Table {} already serving '{}', refusing '{}'",
                self.identity.name, active.entity, entity
            );
            return Ok(false);
        }

        let started_at = self.context.clock.now();
        self.state = TableState::Serving(ActiveService {
            entity: entity.to_string(),
            started_at,
        });
        info!(
            "Table {} started serving '{}' at {}",
            self.identity.name, entity, started_at
        );

        self.after_mutation()?;
        Ok(true)
    }

    /// Take `entity` out of the queue and begin serving it, as one change
    pub fn start_queued_service(&mut self, entity: &str) -> Result<bool> {
        if matches!(self.state, TableState::Serving(_)) {
            return self.start_service(entity);
        }

        self.remove(entity);
        self.start_service(entity)
    }

    /// End the running service and record it in the history
    pub fn finish_service(&mut self) -> Result<Option<Correction>> {
        let TableState::Serving(active) = &self.state else {
            return Ok(None);
        };

        let mut end = self.context.clock.now();
        if end < active.started_at {
            warn!(
                "Clock for table {} moved behind service start ({} < {}), recording zero duration",
                self.identity.name, end, active.started_at
            );
            end = active.started_at;
        }

        let correction = self.context.write_history(|history| {
            history.add(
                active.entity.clone(),
                self.identity.name.clone(),
                active.started_at,
                end,
            )
        })??;
        self.state = TableState::Idle;

        info!(
            "Table {} finished serving '{}' after {}s",
            self.identity.name,
            correction.entity,
            correction.duration()
        );

        self.recompute_estimate()?;
        Ok(Some(correction))
    }

    /// Finish the running service and put the entity back at the end of the
    /// queue
    pub fn pause_service(&mut self) -> Result<Option<Correction>> {
        let Some(correction) = self.finish_service()? else {
            return Ok(None);
        };

        self.insert_at(&correction.entity, None);
        self.recompute_estimate()?;
        Ok(Some(correction))
    }

    fn insert_at(&mut self, entity: &str, position: Option<usize>) -> bool {
        if self.contains(entity) {
            return false;
        }
        let position = position.unwrap_or(self.queue.len()).min(self.queue.len());
        self.queue.insert(position, entity.to_string());
        true
    }

    fn remove(&mut self, entity: &str) -> bool {
        match self.position_of(entity) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn after_mutation(&mut self) -> Result<()> {
        self.context.write_history(CorrectionLog::touch)?;
        self.recompute_estimate()?;
        Ok(())
    }

    fn compute_estimate(&self) -> Result<f64> {
        let stats = self.stats()?;
        Ok(self.context.estimator.estimate(&EstimateInput {
            history: &stats,
            queue_length: self.queue.len(),
            now: self.context.clock.now(),
        }))
    }

    fn recompute_estimate(&mut self) -> Result<f64> {
        let estimate = self.compute_estimate()?;
        self.expected_duration = Some(estimate);
        Ok(estimate)
    }
}
