//! File level helpers: atomic writes with backups, roster and table snapshot
//! files

use crate::error::{CoordinationError, Result};
use crate::table::TableSnapshot;
use crate::types::EntityId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `<path>.<suffix>`, e.g. `history.csv.bak`
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Replace `path` with `contents` through a temporary file and a rename.
/// With `backup`, the previous file is copied to `<path>.bak` first.
pub fn write_atomically(path: &Path, contents: &[u8], backup: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    if backup && path.exists() {
        let backup_path = sibling_path(path, "bak");
        fs::copy(path, &backup_path).with_context(|| {
            format!(
                "Failed to back up {} to {}",
                path.display(),
                backup_path.display()
            )
        })?;
    }

    let tmp_path = sibling_path(path, "tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Parse the roster: comma separated entity ids, usually on one line
pub fn read_roster<R: Read>(reader: R, location: &str) -> Result<Vec<EntityId>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut roster = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|e| CoordinationError::corrupt(location, e.to_string()))?;
        roster.extend(
            record
                .iter()
                .filter(|field| !field.is_empty())
                .map(str::to_string),
        );
    }
    Ok(roster)
}

pub fn load_roster(path: &Path) -> Result<Vec<EntityId>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open roster file {}", path.display()))?;
    let roster = read_roster(file, &path.display().to_string())?;
    if roster.is_empty() {
        warn!("Roster {} lists no entities", path.display());
    }

    info!("Loaded {} entities from {}", roster.len(), path.display());
    Ok(roster)
}

pub fn dump_roster(roster: &[EntityId], path: &Path, backup: bool) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(roster)?;
    let buffer = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to encode roster: {}", e))?;
    write_atomically(path, &buffer, backup)
}

/// Load a table snapshot; `None` when the file does not exist yet
pub fn load_table_snapshot(path: &Path) -> Result<Option<TableSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read table file {}", path.display()))?;
    let snapshot = TableSnapshot::from_json(&contents, &path.display().to_string())?;
    Ok(Some(snapshot))
}

pub fn dump_table_snapshot(snapshot: &TableSnapshot, path: &Path, backup: bool) -> Result<()> {
    let json = snapshot.to_json()?;
    write_atomically(path, json.as_bytes(), backup)
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterFile {
    operation_counter: u64,
}

/// Operation counter saved by the previous run; 0 when the file does not
/// exist yet
pub fn load_operation_counter(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read counter file {}", path.display()))?;
    let file: CounterFile = serde_json::from_str(&contents).map_err(|e| {
        CoordinationError::corrupt(path.display().to_string(), e.to_string())
    })?;
    Ok(file.operation_counter)
}

pub fn dump_operation_counter(operation_counter: u64, path: &Path) -> Result<()> {
    let json = serde_json::to_string(&CounterFile { operation_counter })?;
    write_atomically(path, json.as_bytes(), false)
}
