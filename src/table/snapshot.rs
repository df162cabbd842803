//! Persisted shape of a service table

use crate::error::{CoordinationError, Result};
use crate::types::{EntityId, TableName, TableStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Everything needed to restore one table, stored as a JSON document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: TableName,
    #[serde(default, alias = "problem")]
    pub topic: String,
    #[serde(default, alias = "coordinators")]
    pub operators: Vec<String>,
    #[serde(default)]
    pub queue: Vec<EntityId>,
    #[serde(default)]
    pub status: TableStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "current_coordination_team"
    )]
    pub current_entity: Option<EntityId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "current_coordination_start_time"
    )]
    pub current_start: Option<Timestamp>,
}

impl TableSnapshot {
    /// Parse a snapshot document
    pub fn from_json(input: &str, location: &str) -> Result<Self> {
        let snapshot: TableSnapshot = serde_json::from_str(input)
            .map_err(|e| CoordinationError::corrupt(location, e.to_string()))?;
        snapshot.validate(location)?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the structural invariants of a loaded snapshot
    pub fn validate(&self, location: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoordinationError::corrupt(location, "empty table name").into());
        }

        let mut seen = HashSet::new();
        for entity in &self.queue {
            if entity.is_empty() {
                return Err(CoordinationError::corrupt(location, "empty entity in queue").into());
            }
            if !seen.insert(entity.as_str()) {
                return Err(CoordinationError::corrupt(
                    location,
                    format!("entity '{}' queued twice", entity),
                )
                .into());
            }
        }

        if self.status == TableStatus::Serving
            && (self.current_entity.is_none() || self.current_start.is_none())
        {
            return Err(CoordinationError::corrupt(
                location,
                "serving table without current entity and start time",
            )
            .into());
        }

        Ok(())
    }

    /// The same snapshot with any running service dropped; the table comes
    /// back idle
    pub fn without_active_service(mut self) -> Self {
        if self.status == TableStatus::Serving {
            self.status = TableStatus::Idle;
        }
        self.current_entity = None;
        self.current_start = None;
        self
    }
}
