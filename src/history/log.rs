//! The correction log: ordered history of completed services plus the
//! system-wide operation counter

use crate::error::Result;
use crate::estimate::statistics::DurationStats;
use crate::history::correction::{Correction, CorrectionFilter};
use crate::types::{CorrectionId, EntityId, TableName, Timestamp};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handle to the log shared by every table of a coordinator
pub type SharedCorrectionLog = Arc<RwLock<CorrectionLog>>;

/// Append-only (modulo administrative deletes) history of services.
///
/// The operation counter is bumped by every state-changing call in the
/// system, not only by history edits; pollers compare it against the value
/// they saw last to detect changes.
#[derive(Debug, Clone, Default)]
pub struct CorrectionLog {
    corrections: Vec<Correction>,
    operation_counter: u64,
}

impl CorrectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from already validated records, keeping their order
    pub fn from_corrections(corrections: Vec<Correction>) -> Self {
        Self {
            corrections,
            operation_counter: 0,
        }
    }

    /// Continue counting from a counter value persisted by an earlier run
    pub fn with_operation_counter(mut self, operation_counter: u64) -> Self {
        self.operation_counter = operation_counter;
        self
    }

    pub fn into_shared(self) -> SharedCorrectionLog {
        Arc::new(RwLock::new(self))
    }

    /// Append a new correction with a generated id
    pub fn add(
        &mut self,
        entity: impl Into<EntityId>,
        table: impl Into<TableName>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Correction> {
        let correction = Correction::new(entity, table, start, end)?;
        debug!(
            "Recording correction {} - entity: '{}', table: '{}', duration: {}s",
            correction.id,
            correction.entity,
            correction.table,
            correction.duration()
        );

        self.corrections.push(correction.clone());
        self.touch();
        Ok(correction)
    }

    /// Remove the first correction with the given id
    pub fn delete(&mut self, id: &str) -> bool {
        match self.corrections.iter().position(|c| c.id == id) {
            Some(index) => {
                let removed = self.corrections.remove(index);
                debug!(
                    "Deleted correction {} - entity: '{}', table: '{}'",
                    removed.id, removed.entity, removed.table
                );
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Corrections matching the filter, in insertion order
    pub fn query(&self, filter: &CorrectionFilter) -> Vec<Correction> {
        self.corrections
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &CorrectionId) -> Option<&Correction> {
        self.corrections.iter().find(|c| &c.id == id)
    }

    /// Duration statistics for one table
    pub fn stats_for_table(&self, table: &str) -> DurationStats {
        DurationStats::from_durations(
            self.corrections
                .iter()
                .filter(|c| c.table == table)
                .map(Correction::duration),
        )
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    pub fn operation_counter(&self) -> u64 {
        self.operation_counter
    }

    /// Record that something in the system changed; returns the new counter
    pub fn touch(&mut self) -> u64 {
        self.operation_counter += 1;
        self.operation_counter
    }
}
