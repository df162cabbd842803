//! Correction records and the typed query filter

use crate::error::{CoordinationError, Result};
use crate::types::{CorrectionId, EntityId, TableName, Timestamp};
use crate::utils::generate_correction_id;
use serde::{Deserialize, Serialize};

/// Record of one completed service at a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub entity: EntityId,
    pub table: TableName,
    pub start: Timestamp,
    pub end: Timestamp,
    pub id: CorrectionId,
}

impl Correction {
    /// Create a correction with a freshly generated id
    pub fn new(
        entity: impl Into<EntityId>,
        table: impl Into<TableName>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Self> {
        Self::with_id(entity, table, start, end, generate_correction_id())
    }

    /// Create a correction with a caller supplied id (used when loading history)
    pub fn with_id(
        entity: impl Into<EntityId>,
        table: impl Into<TableName>,
        start: Timestamp,
        end: Timestamp,
        id: impl Into<CorrectionId>,
    ) -> Result<Self> {
        if end < start {
            return Err(CoordinationError::InvalidRange { start, end }.into());
        }

        Ok(Self {
            entity: entity.into(),
            table: table.into(),
            start,
            end,
            id: id.into(),
        })
    }

    /// Duration of the service in seconds
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeRange {
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && ts <= self.to
    }
}

/// Conjunctive filter over the correction log; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionFilter {
    pub id: Option<CorrectionId>,
    pub table: Option<TableName>,
    pub entity: Option<EntityId>,
    pub start: Option<TimeRange>,
    pub end: Option<TimeRange>,
}

impl CorrectionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_table(table: impl Into<TableName>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<CorrectionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<TableName>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<EntityId>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn starting_between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.start = Some(TimeRange::new(from, to));
        self
    }

    pub fn ending_between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.end = Some(TimeRange::new(from, to));
        self
    }

    pub fn matches(&self, correction: &Correction) -> bool {
        self.id.as_ref().map_or(true, |id| *id == correction.id)
            && self.table.as_ref().map_or(true, |t| *t == correction.table)
            && self.entity.as_ref().map_or(true, |e| *e == correction.entity)
            && self.start.map_or(true, |r| r.contains(correction.start))
            && self.end.map_or(true, |r| r.contains(correction.end))
    }
}
