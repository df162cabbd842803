//! Coordinator owning every service table of the event
//!
//! The coordinator validates each request against the roster and the table
//! set, enforces the cross-table invariants a single table cannot see (an
//! entity waits in at most one queue, a served or called entity cannot be
//! claimed elsewhere) and then delegates to the table state machine.

use crate::error::{CoordinationError, Result};
use crate::estimate::DurationStats;
use crate::history::{Correction, CorrectionFilter, SharedCorrectionLog};
use crate::table::{ServiceTable, TableContext, TableIdentity, TableSnapshot};
use crate::types::{EntityId, TableName, TableStatus};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Default number of places a skipped entity moves back
pub const DEFAULT_SKIP_DISTANCE: usize = 3;

/// One table as shown to pollers: its snapshot plus the current estimate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOverview {
    #[serde(flatten)]
    pub table: TableSnapshot,
    pub expected_duration: f64,
}

/// Every table plus the change token the overview was taken at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorOverview {
    pub last_update: u64,
    pub tables: Vec<TableOverview>,
}

/// Everything that has to reach disk to restore the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub operation_counter: u64,
    pub history: Vec<Correction>,
    pub tables: Vec<TableSnapshot>,
}

/// Per-table statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: TableName,
    pub status: TableStatus,
    pub queue_length: usize,
    pub expected_duration: f64,
    pub completed_services: u64,
    pub mean_duration_seconds: f64,
    pub std_dev_duration_seconds: f64,
    pub min_duration_seconds: Option<f64>,
    pub max_duration_seconds: Option<f64>,
}

impl TableStats {
    fn new(table: &ServiceTable, stats: &DurationStats, expected_duration: f64) -> Self {
        let has_samples = stats.sample_count > 0;
        Self {
            table: table.name().to_string(),
            status: table.status(),
            queue_length: table.queue().len(),
            expected_duration,
            completed_services: stats.sample_count,
            mean_duration_seconds: stats.mean(),
            std_dev_duration_seconds: stats.standard_deviation(),
            min_duration_seconds: has_samples.then(|| stats.min()),
            max_duration_seconds: has_samples.then(|| stats.max()),
        }
    }
}

/// The coordinator
pub struct Coordinator {
    /// Valid entity ids in roster order
    roster: Vec<EntityId>,
    known_entities: HashSet<EntityId>,
    /// Tables in configuration order
    tables: Vec<ServiceTable>,
    context: TableContext,
    skip_distance: usize,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("roster", &self.roster)
            .field("tables", &self.tables)
            .field("skip_distance", &self.skip_distance)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator whose tables all start idle with empty queues
    pub fn new(
        roster: Vec<EntityId>,
        identities: Vec<TableIdentity>,
        context: TableContext,
    ) -> Result<Self> {
        let tables = identities
            .into_iter()
            .map(|identity| ServiceTable::new(identity, context.clone()))
            .collect::<Result<Vec<_>>>()?;

        Self::from_tables(roster, tables, context)
    }

    /// Assemble a coordinator from already restored tables
    pub fn from_tables(
        roster: Vec<EntityId>,
        tables: Vec<ServiceTable>,
        context: TableContext,
    ) -> Result<Self> {
        let mut names = HashSet::new();
        for table in &tables {
            if !names.insert(table.name().to_string()) {
                return Err(CoordinationError::ConfigurationError {
                    message: format!("Duplicate table name '{}'", table.name()),
                }
                .into());
            }
        }

        let mut known_entities = HashSet::new();
        let mut unique_roster = Vec::with_capacity(roster.len());
        for entity in roster {
            if entity.is_empty() {
                continue;
            }
            if known_entities.insert(entity.clone()) {
                unique_roster.push(entity);
            } else {
                warn!("Entity '{}' listed twice in roster, ignoring duplicate", entity);
            }
        }

        let coordinator = Self {
            roster: unique_roster,
            known_entities,
            tables,
            context,
            skip_distance: DEFAULT_SKIP_DISTANCE,
        };
        coordinator.warn_on_inconsistent_state();

        info!(
            "Coordinator ready - tables: {}, roster: {} entities",
            coordinator.tables.len(),
            coordinator.roster.len()
        );
        Ok(coordinator)
    }

    /// Set how many places `skip_to_next` moves the head back
    pub fn with_skip_distance(mut self, skip_distance: usize) -> Self {
        self.skip_distance = skip_distance;
        self
    }

    pub fn skip_distance(&self) -> usize {
        self.skip_distance
    }

    pub fn roster(&self) -> &[EntityId] {
        &self.roster
    }

    pub fn tables(&self) -> &[ServiceTable] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&ServiceTable> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn history(&self) -> &SharedCorrectionLog {
        &self.context.history
    }

    pub fn is_known_entity(&self, entity: &str) -> bool {
        self.known_entities.contains(entity)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Current value of the system-wide change counter
    pub fn operation_counter(&self) -> Result<u64> {
        self.context.read_history(|h| h.operation_counter())
    }

    /// Entities claimed by a table: served at a SERVING table or at the head
    /// of a CALLING table's queue
    pub fn unavailable_entities(&self) -> BTreeSet<EntityId> {
        self.tables
            .iter()
            .filter_map(|table| claimed_entity(table).cloned())
            .collect()
    }

    pub fn queue(&self, table: &str) -> Result<Vec<EntityId>> {
        Ok(self.existing_table(table)?.queue().to_vec())
    }

    pub fn expected_duration(&self, table: &str) -> Result<f64> {
        self.existing_table(table)?.expected_duration()
    }

    /// Add an entity to a table's queue (last, or at `position`)
    pub fn enqueue(&mut self, table: &str, entity: &str, position: Option<usize>) -> Result<bool> {
        self.existing_table(table)?;
        self.ensure_known_entity(entity)?;
        self.ensure_not_queued(entity)?;
        if let Some(serving) = self.serving_table_of(entity) {
            return Err(unavailable(
                entity,
                format!("being served at table {}", serving.name()),
            ));
        }

        self.table_mut(table)?.enqueue(entity, position)
    }

    pub fn dequeue(&mut self, table: &str, entity: &str) -> Result<bool> {
        self.ensure_known_entity(entity)?;
        self.ensure_in_queue(table, entity)?;
        self.table_mut(table)?.dequeue(entity)
    }

    pub fn swap(&mut self, table: &str, first: &str, second: &str) -> Result<bool> {
        if first == second {
            return Err(CoordinationError::InvalidRequest {
                reason: "You have to give two different entities to be swapped.".to_string(),
            }
            .into());
        }
        for entity in [first, second] {
            self.ensure_known_entity(entity)?;
            self.ensure_in_queue(table, entity)?;
        }

        self.table_mut(table)?.swap(first, second)
    }

    /// Start serving `entity`, taking it out of this table's queue first
    pub fn start_service(&mut self, table: &str, entity: &str) -> Result<bool> {
        self.ensure_known_entity(entity)?;
        self.existing_table(table)?;
        self.ensure_unclaimed_elsewhere(table, entity)?;
        if let Some(other) = self.queued_table_of(entity).filter(|t| t.name() != table) {
            return Err(CoordinationError::AlreadyQueued {
                entity: entity.to_string(),
                table: other.name().to_string(),
            }
            .into());
        }

        let target = self.table_mut(table)?;
        if target.status() == TableStatus::Serving {
            debug!("Table {} is already serving, refusing '{}'", table, entity);
            return Ok(false);
        }
        target.start_queued_service(entity)
    }

    pub fn finish_service(&mut self, table: &str) -> Result<Option<Correction>> {
        self.table_mut(table)?.finish_service()
    }

    pub fn pause_service(&mut self, table: &str) -> Result<Option<Correction>> {
        self.table_mut(table)?.pause_service()
    }

    pub fn switch_to_calling(&mut self, table: &str) -> Result<bool> {
        self.table_mut(table)?.switch_to_calling()
    }

    pub fn switch_to_idle(&mut self, table: &str) -> Result<bool> {
        self.table_mut(table)?.switch_to_idle()
    }

    pub fn skip_to_next(&mut self, table: &str) -> Result<bool> {
        let skip_distance = self.skip_distance;
        self.table_mut(table)?.skip_to_next(skip_distance)
    }

    /// Move `entity` to the head of the table's queue and call it
    pub fn call_entity(&mut self, table: &str, entity: &str) -> Result<bool> {
        self.existing_table(table)?;
        self.ensure_known_entity(entity)?;
        if let Some(other) = self.queued_table_of(entity).filter(|t| t.name() != table) {
            return Err(CoordinationError::AlreadyQueued {
                entity: entity.to_string(),
                table: other.name().to_string(),
            }
            .into());
        }
        self.ensure_unclaimed_elsewhere(table, entity)?;
        if let Some(serving) = self.serving_table_of(entity) {
            return Err(unavailable(
                entity,
                format!("being served at table {}", serving.name()),
            ));
        }

        self.table_mut(table)?.call_entity(entity)
    }

    /// Record a service by hand
    pub fn history_add(
        &mut self,
        entity: &str,
        table: &str,
        start: i64,
        end: i64,
    ) -> Result<Correction> {
        self.existing_table(table)?;
        self.ensure_known_entity(entity)?;

        let correction = self
            .context
            .write_history(|h| h.add(entity, table, start, end))??;
        info!(
            "Manually recorded correction {} - entity: '{}', table: {}",
            correction.id, entity, table
        );

        self.table_mut(table)?.refresh_estimate()?;
        Ok(correction)
    }

    /// Delete a correction by id; false if no such correction exists
    pub fn history_delete(&mut self, id: &str) -> Result<bool> {
        let table = self.context.read_history(|h| {
            h.corrections()
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.table.clone())
        })?;

        let deleted = self.context.write_history(|h| h.delete(id))?;
        if !deleted {
            debug!("No correction with id {}", id);
            return Ok(false);
        }

        info!("Deleted correction {}", id);
        if let Some(table) = table.and_then(|name| self.tables.iter_mut().find(|t| t.name() == name)) {
            table.refresh_estimate()?;
        }
        Ok(true)
    }

    pub fn history_query(&self, filter: &CorrectionFilter) -> Result<Vec<Correction>> {
        self.context.read_history(|h| h.query(filter))
    }

    /// Recompute every table's cached estimate
    pub fn refresh_estimates(&mut self) -> Result<()> {
        for table in &mut self.tables {
            table.refresh_estimate()?;
        }
        Ok(())
    }

    /// Snapshot of all tables with their estimates
    pub fn overview(&self) -> Result<CoordinatorOverview> {
        let tables = self
            .tables
            .iter()
            .map(|table| {
                Ok(TableOverview {
                    table: table.to_snapshot(),
                    expected_duration: table.expected_duration()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CoordinatorOverview {
            last_update: self.operation_counter()?,
            tables,
        })
    }

    /// The overview, unless nothing changed since the caller's token
    pub fn changes_since(&self, last_update: Option<u64>) -> Result<Option<CoordinatorOverview>> {
        let counter = self.operation_counter()?;
        if last_update == Some(counter) {
            return Ok(None);
        }
        self.overview().map(Some)
    }

    pub fn table_stats(&self) -> Result<Vec<TableStats>> {
        self.tables
            .iter()
            .map(|table| {
                let stats = table.stats()?;
                Ok(TableStats::new(table, &stats, table.expected_duration()?))
            })
            .collect()
    }

    /// Full persisted state
    pub fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        let (operation_counter, history) = self
            .context
            .read_history(|h| (h.operation_counter(), h.corrections().to_vec()))?;

        Ok(CoordinatorSnapshot {
            operation_counter,
            history,
            tables: self.tables.iter().map(ServiceTable::to_snapshot).collect(),
        })
    }

    fn existing_table(&self, name: &str) -> Result<&ServiceTable> {
        self.table(name).ok_or_else(|| unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut ServiceTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| unknown_table(name))
    }

    fn ensure_known_entity(&self, entity: &str) -> Result<()> {
        if self.is_known_entity(entity) {
            Ok(())
        } else {
            Err(CoordinationError::UnknownEntity {
                entity: entity.to_string(),
            }
            .into())
        }
    }

    fn ensure_not_queued(&self, entity: &str) -> Result<()> {
        match self.queued_table_of(entity) {
            Some(table) => Err(CoordinationError::AlreadyQueued {
                entity: entity.to_string(),
                table: table.name().to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn ensure_in_queue(&self, table: &str, entity: &str) -> Result<()> {
        if self.existing_table(table)?.contains(entity) {
            Ok(())
        } else {
            Err(CoordinationError::InvalidRequest {
                reason: format!("Entity {} is not in queue at table {}.", entity, table),
            }
            .into())
        }
    }

    /// Reject entities served or called by a table other than `table`
    fn ensure_unclaimed_elsewhere(&self, table: &str, entity: &str) -> Result<()> {
        let claimed_by = self
            .tables
            .iter()
            .filter(|t| t.name() != table)
            .find(|t| claimed_entity(t).is_some_and(|e| e == entity));

        match claimed_by {
            Some(other) => Err(unavailable(
                entity,
                format!("claimed by table {} ({})", other.name(), other.status()),
            )),
            None => Ok(()),
        }
    }

    fn queued_table_of(&self, entity: &str) -> Option<&ServiceTable> {
        self.tables.iter().find(|t| t.contains(entity))
    }

    fn serving_table_of(&self, entity: &str) -> Option<&ServiceTable> {
        self.tables
            .iter()
            .find(|t| t.active_service().is_some_and(|a| a.entity == entity))
    }

    fn warn_on_inconsistent_state(&self) {
        let mut seen: HashSet<&str> = HashSet::new();
        for table in &self.tables {
            for entity in table.queue() {
                if !self.is_known_entity(entity) {
                    warn!("Table {} queues '{}' which is not in the roster", table.name(), entity);
                }
                if !seen.insert(entity.as_str()) {
                    warn!("Entity '{}' waits in more than one queue", entity);
                }
            }
        }
    }
}

fn claimed_entity(table: &ServiceTable) -> Option<&EntityId> {
    match table.status() {
        TableStatus::Serving => table.active_service().map(|a| &a.entity),
        TableStatus::Calling => table.head(),
        TableStatus::Idle => None,
    }
}

fn unknown_table(name: &str) -> anyhow::Error {
    CoordinationError::UnknownTable {
        name: name.to_string(),
    }
    .into()
}

fn unavailable(entity: &str, reason: String) -> anyhow::Error {
    CoordinationError::EntityUnavailable {
        entity: entity.to_string(),
        reason,
    }
    .into()
}
