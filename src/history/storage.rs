//! CSV persistence for the correction log
//!
//! One correction per row, no header: `entity,table,start,end,id`.
//! Loading is all-or-nothing: the first malformed row aborts the load.

use crate::error::{CoordinationError, Result};
use crate::history::correction::Correction;
use crate::history::log::CorrectionLog;
use crate::persistence::files::write_atomically;
use anyhow::Context;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

const FIELDS_PER_ROW: usize = 5;

/// Parse a correction log from CSV rows
pub fn read_corrections<R: Read>(reader: R, location: &str) -> Result<CorrectionLog> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut corrections = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| {
            CoordinationError::corrupt(location, format!("row {}: {}", index + 1, e))
        })?;

        if record.iter().all(str::is_empty) {
            continue;
        }

        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 1);

        if record.len() != FIELDS_PER_ROW {
            return Err(CoordinationError::corrupt(
                location,
                format!(
                    "line {}: expected {} fields, found {}",
                    line,
                    FIELDS_PER_ROW,
                    record.len()
                ),
            )
            .into());
        }

        let parse_ts = |field: &str, name: &str| {
            field.parse::<i64>().map_err(|_| {
                CoordinationError::corrupt(
                    location,
                    format!("line {}: {} '{}' is not an integer timestamp", line, name, field),
                )
            })
        };
        let start = parse_ts(&record[2], "start")?;
        let end = parse_ts(&record[3], "end")?;

        if record[4].is_empty() {
            return Err(
                CoordinationError::corrupt(location, format!("line {}: empty id", line)).into(),
            );
        }

        let correction = Correction::with_id(&record[0], &record[1], start, end, &record[4])
            .map_err(|e| CoordinationError::corrupt(location, format!("line {}: {}", line, e)))?;
        corrections.push(correction);
    }

    Ok(CorrectionLog::from_corrections(corrections))
}

/// Serialize every correction as a CSV row, in log order
pub fn write_corrections<W: Write>(corrections: &[Correction], writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    for correction in corrections {
        csv_writer.write_record([
            correction.entity.as_str(),
            correction.table.as_str(),
            correction.start.to_string().as_str(),
            correction.end.to_string().as_str(),
            correction.id.as_str(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Load the history file; a missing file means no service has happened yet
pub fn load_history(path: &Path) -> Result<CorrectionLog> {
    if !path.exists() {
        warn!(
            "History file {} does not exist, starting with an empty history",
            path.display()
        );
        return Ok(CorrectionLog::new());
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open history file {}", path.display()))?;
    let log = read_corrections(file, &path.display().to_string())?;

    info!(
        "Loaded {} corrections from {}",
        log.len(),
        path.display()
    );
    Ok(log)
}

/// Write the history file, optionally keeping a backup of the previous one
pub fn dump_history(corrections: &[Correction], path: &Path, backup: bool) -> Result<()> {
    let mut buffer = Vec::new();
    write_corrections(corrections, &mut buffer)?;
    write_atomically(path, &buffer, backup)
}
