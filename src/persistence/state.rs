//! Loading the coordinator at startup and persisting it after mutations

use crate::config::{AppConfig, StorageSettings};
use crate::coordinator::{Coordinator, CoordinatorSnapshot};
use crate::error::{CoordinationError, Result};
use crate::estimate::HistoricalDurationEstimator;
use crate::history::{dump_history, load_history};
use crate::persistence::files::{
    dump_operation_counter, dump_table_snapshot, load_operation_counter, load_roster,
    load_table_snapshot, sibling_path,
};
use crate::table::{ServiceTable, TableContext, TableIdentity};
use crate::utils::Clock;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// File holding the last persisted operation counter
pub fn counter_path(storage: &StorageSettings) -> PathBuf {
    storage
        .counter_path
        .clone()
        .unwrap_or_else(|| sibling_path(&storage.history_path, "counter"))
}

/// Build the coordinator from the roster, history and table files named in
/// the configuration. Any corruption aborts the load.
///
/// The operation counter resumes one past the persisted value, and the new
/// value is written back at once. A restart may drop running services, so
/// pollers holding the last token refetch.
pub fn load_coordinator(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Coordinator> {
    let storage = &config.storage;
    let roster = load_roster(&storage.roster_path)?;
    let counter_file = counter_path(storage);
    let operation_counter = load_operation_counter(&counter_file)?;
    let mut history = load_history(&storage.history_path)?.with_operation_counter(operation_counter);
    dump_operation_counter(history.touch(), &counter_file)?;
    let history = history.into_shared();
    let estimator = Arc::new(HistoricalDurationEstimator::new(config.estimation.clone())?);
    let context = TableContext::new(history, estimator, clock);

    let mut tables = Vec::with_capacity(storage.tables.len());
    for settings in &storage.tables {
        let location = settings.path.display().to_string();
        let table = match load_table_snapshot(&settings.path)? {
            Some(snapshot) => {
                if snapshot.name != settings.name {
                    return Err(CoordinationError::corrupt(
                        location,
                        format!(
                            "snapshot belongs to table '{}', expected '{}'",
                            snapshot.name, settings.name
                        ),
                    )
                    .into());
                }
                ServiceTable::from_snapshot(snapshot, context.clone(), &location)?
            }
            None => {
                warn!(
                    "Table file {} does not exist, starting table {} idle",
                    location, settings.name
                );
                ServiceTable::new(
                    TableIdentity::new(
                        settings.name.clone(),
                        settings.topic.clone(),
                        settings.operators.clone(),
                    ),
                    context.clone(),
                )?
            }
        };
        debug!(
            "Restored table {} - status: {}, queued: {}",
            table.name(),
            table.status(),
            table.queue().len()
        );
        tables.push(table);
    }

    let coordinator = Coordinator::from_tables(roster, tables, context)?
        .with_skip_distance(config.scheduling.skip_distance);
    info!(
        "Loaded coordinator state - tables: {}, roster: {}, operation counter: {}",
        coordinator.tables().len(),
        coordinator.roster().len(),
        coordinator.operation_counter()?
    );
    Ok(coordinator)
}

/// Destination for coordinator snapshots
#[async_trait]
pub trait StatePersister: Send + Sync {
    /// Store the snapshot, replacing whatever was stored before
    async fn persist(&self, snapshot: &CoordinatorSnapshot) -> Result<()>;
}

/// Writes the history CSV and one JSON file per table
#[derive(Debug, Clone)]
pub struct FileStatePersister {
    storage: StorageSettings,
}

impl FileStatePersister {
    pub fn new(storage: StorageSettings) -> Self {
        Self { storage }
    }

    /// Synchronous write of every file in the snapshot
    pub fn write(&self, snapshot: &CoordinatorSnapshot) -> Result<()> {
        write_snapshot(&self.storage, snapshot)
    }
}

#[async_trait]
impl StatePersister for FileStatePersister {
    async fn persist(&self, snapshot: &CoordinatorSnapshot) -> Result<()> {
        let storage = self.storage.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&storage, &snapshot)).await?
    }
}

fn write_snapshot(storage: &StorageSettings, snapshot: &CoordinatorSnapshot) -> Result<()> {
    let backup = storage.backup_before_write;
    dump_history(&snapshot.history, &storage.history_path, backup)?;

    for table in &snapshot.tables {
        let Some(settings) = storage.tables.iter().find(|s| s.name == table.name) else {
            warn!("No file configured for table {}, not persisted", table.name);
            continue;
        };

        if storage.keep_active_service {
            dump_table_snapshot(table, &settings.path, backup)?;
        } else {
            dump_table_snapshot(&table.clone().without_active_service(), &settings.path, backup)?;
        }
    }

    dump_operation_counter(snapshot.operation_counter, &counter_path(storage))?;

    debug!(
        "Persisted state at operation {} ({} corrections, {} tables)",
        snapshot.operation_counter,
        snapshot.history.len(),
        snapshot.tables.len()
    );
    Ok(())
}

/// Keeps every persisted snapshot in memory
#[derive(Debug, Default)]
pub struct InMemoryStatePersister {
    snapshots: RwLock<Vec<CoordinatorSnapshot>>,
}

impl InMemoryStatePersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Result<Option<CoordinatorSnapshot>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| CoordinationError::lock_poisoned("snapshots"))?;
        Ok(snapshots.last().cloned())
    }

    pub fn count(&self) -> Result<usize> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| CoordinationError::lock_poisoned("snapshots"))?;
        Ok(snapshots.len())
    }
}

#[async_trait]
impl StatePersister for InMemoryStatePersister {
    async fn persist(&self, snapshot: &CoordinatorSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .map_err(|_| CoordinationError::lock_poisoned("snapshots"))?
            .push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableSettings;
    use crate::persistence::files::dump_roster;
    use crate::types::TableStatus;
    use crate::utils::ManualClock;
    use std::path::Path;

    fn config_in(dir: &Path, keep_active_service: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.roster_path = dir.join("roster.csv");
        config.storage.history_path = dir.join("history.csv");
        config.storage.keep_active_service = keep_active_service;
        config.storage.tables = ["T2", "T5"]
            .iter()
            .map(|name| TableSettings {
                name: name.to_string(),
                path: dir.join(format!("{}.json", name)),
                topic: format!("Problem {}", &name[1..]),
                operators: vec![],
            })
            .collect();
        config
    }

    fn seed_roster(config: &AppConfig) {
        let roster: Vec<String> = ["ITA", "ENG", "KOR", "USA"]
            .iter()
            .map(|e| e.to_string())
            .collect();
        dump_roster(&roster, &config.storage.roster_path, false).unwrap();
    }

    #[tokio::test]
    async fn test_fresh_state_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), false);
        seed_roster(&config);
        let clock = Arc::new(ManualClock::new(100));

        let mut coordinator = load_coordinator(&config, clock.clone()).unwrap();
        assert_eq!(coordinator.tables()[1].topic(), "Problem 5");
        coordinator.enqueue("T2", "ITA", None).unwrap();
        coordinator.enqueue("T2", "ENG", None).unwrap();
        coordinator.start_service("T5", "KOR").unwrap();
        clock.advance(20);
        coordinator.finish_service("T5").unwrap();
        coordinator.start_service("T5", "USA").unwrap();
        coordinator.switch_to_calling("T2").unwrap();

        let persister = FileStatePersister::new(config.storage.clone());
        persister.persist(&coordinator.snapshot().unwrap()).await.unwrap();

        let restored = load_coordinator(&config, clock.clone()).unwrap();
        assert_eq!(restored.queue("T2").unwrap(), ["ITA", "ENG"]);
        assert_eq!(restored.table("T2").unwrap().status(), TableStatus::Calling);
        // Running service is dropped on dump
        assert_eq!(restored.table("T5").unwrap().status(), TableStatus::Idle);
        assert!(restored.table("T5").unwrap().active_service().is_none());
        assert_eq!(
            restored.snapshot().unwrap().history,
            coordinator.snapshot().unwrap().history
        );
    }

    #[tokio::test]
    async fn test_keep_active_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), true);
        seed_roster(&config);
        let clock = Arc::new(ManualClock::new(100));

        let mut coordinator = load_coordinator(&config, clock.clone()).unwrap();
        coordinator.start_service("T2", "USA").unwrap();
        FileStatePersister::new(config.storage.clone())
            .persist(&coordinator.snapshot().unwrap())
            .await
            .unwrap();

        let restored = load_coordinator(&config, clock).unwrap();
        let active = restored.table("T2").unwrap().active_service().unwrap();
        assert_eq!(active.entity, "USA");
        assert_eq!(active.started_at, 100);
    }

    #[test]
    fn test_mismatched_table_name_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), false);
        seed_roster(&config);
        std::fs::write(&config.storage.tables[0].path, r#"{"name": "T9"}"#).unwrap();

        let err = load_coordinator(&config, Arc::new(ManualClock::new(0)))
            .err()
            .expect("corrupt table file");
        assert!(matches!(
            err.downcast_ref::<CoordinationError>(),
            Some(CoordinationError::CorruptPersistedState { .. })
        ));
    }

    #[test]
    fn test_corrupt_history_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), false);
        seed_roster(&config);
        std::fs::write(&config.storage.history_path, "ITA,T2,5,10,ID1\nENG,T2,x,12,ID2\n").unwrap();

        assert!(load_coordinator(&config, Arc::new(ManualClock::new(0))).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_persister() {
        let persister = InMemoryStatePersister::new();
        assert!(persister.latest().unwrap().is_none());

        let snapshot = CoordinatorSnapshot {
            operation_counter: 4,
            history: vec![],
            tables: vec![],
        };
        persister.persist(&snapshot).await.unwrap();
        assert_eq!(persister.count().unwrap(), 1);
        assert_eq!(persister.latest().unwrap(), Some(snapshot));
    }
}
