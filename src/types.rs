//! Common types used throughout the coordination service

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier of a participant (a team) that can be queued at a table
pub type EntityId = String;

/// Unique name of a service table
pub type TableName = String;

/// Opaque, globally unique identifier of a correction record
pub type CorrectionId = String;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// Externally visible status of a table.
///
/// Serialized as `"IDLE"`, `"CALLING"` or `"SERVING"`. Older snapshots used
/// `NOTHING`/`BUSY` for idle tables and `CORRECTING` for serving ones; those
/// names are still accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    #[default]
    #[serde(alias = "NOTHING", alias = "BUSY")]
    Idle,
    Calling,
    #[serde(alias = "CORRECTING")]
    Serving,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Idle => "IDLE",
            TableStatus::Calling => "CALLING",
            TableStatus::Serving => "SERVING",
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableStatus {
    type Err = crate::error::CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" | "NOTHING" | "BUSY" => Ok(TableStatus::Idle),
            "CALLING" => Ok(TableStatus::Calling),
            "SERVING" | "CORRECTING" => Ok(TableStatus::Serving),
            other => Err(crate::error::CoordinationError::InvalidRequest {
                reason: format!("unknown table status '{}'", other),
            }),
        }
    }
}

/// A pause in the event schedule that does not count towards the remaining
/// service budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakInterval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BreakInterval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Seconds of this break that still lie ahead of `now`
    pub fn remaining_after(&self, now: Timestamp) -> i64 {
        self.end.max(now).saturating_sub(self.start.max(now))
    }
}
