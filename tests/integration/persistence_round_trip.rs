//! State survives a restart through the file persister

use crate::fixtures::{self, EVENT_START};
use std::sync::Arc;
use table_coordinator::error::CoordinationError;
use table_coordinator::history::load_history;
use table_coordinator::metrics::MetricsCollector;
use table_coordinator::persistence::{
    counter_path, load_coordinator, load_operation_counter, load_table_snapshot, FileStatePersister,
};
use table_coordinator::service::CoordinationService;
use table_coordinator::types::TableStatus;
use table_coordinator::utils::ManualClock;

fn file_service(config: &table_coordinator::config::AppConfig, clock: Arc<ManualClock>) -> CoordinationService {
    let coordinator = load_coordinator(config, clock).expect("load coordinator");
    CoordinationService::new(
        coordinator,
        Arc::new(FileStatePersister::new(config.storage.clone())),
        Arc::new(MetricsCollector::new().expect("metrics collector")),
    )
}

#[tokio::test]
async fn test_first_start_without_table_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1", "T2"]);

    let clock = Arc::new(ManualClock::new(EVENT_START));
    let coordinator = load_coordinator(&config, clock).unwrap();

    assert_eq!(coordinator.tables().len(), 2);
    assert_eq!(coordinator.roster().len(), fixtures::roster().len());
    let table = coordinator.table("T2").unwrap();
    assert_eq!(table.status(), TableStatus::Idle);
    assert_eq!(table.topic(), "Problem T2");
    assert_eq!(table.operators(), ["Alice"]);
    assert!(coordinator.history_query(&Default::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_mutations_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1", "T2"]);
    let clock = Arc::new(ManualClock::new(EVENT_START));

    let service = file_service(&config, clock.clone());
    service
        .mutate("enqueue", |c| c.enqueue("T1", "ITA", None))
        .await
        .unwrap();
    service
        .mutate("enqueue", |c| c.enqueue("T1", "ENG", None))
        .await
        .unwrap();
    service
        .mutate("start", |c| c.start_service("T2", "FRA"))
        .await
        .unwrap();
    clock.advance(420);
    service
        .mutate("finish", |c| c.finish_service("T2"))
        .await
        .unwrap();
    assert!(service.last_persist_ok());

    let history = load_history(&config.storage.history_path).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.corrections()[0].duration(), 420);

    // Restart from disk
    let restarted = load_coordinator(&config, clock).unwrap();
    assert_eq!(restarted.queue("T1").unwrap(), ["ITA", "ENG"]);
    assert_eq!(restarted.table("T2").unwrap().status(), TableStatus::Idle);
    let corrections = restarted.history_query(&Default::default()).unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].entity, "FRA");
    // (420 + 600) / 2
    assert_eq!(restarted.expected_duration("T2").unwrap(), 510.0);
}

#[tokio::test]
async fn test_polling_token_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1", "T2"]);
    let clock = Arc::new(ManualClock::new(EVENT_START));

    let service = file_service(&config, clock.clone());
    for entity in ["ITA", "ENG"] {
        service
            .mutate("enqueue", |c| c.enqueue("T1", entity, None))
            .await
            .unwrap();
    }
    let token = service.read(|c| c.operation_counter()).await.unwrap();
    assert_eq!(load_operation_counter(&counter_path(&config.storage)).unwrap(), token);

    // The restart itself is reported as a change
    let restarted = file_service(&config, clock.clone());
    let counter = restarted.read(|c| c.operation_counter()).await.unwrap();
    assert_eq!(counter, token + 1);
    assert!(restarted
        .read(|c| c.changes_since(Some(token)))
        .await
        .unwrap()
        .is_some());

    restarted
        .mutate("dequeue", |c| c.dequeue("T1", "ITA"))
        .await
        .unwrap();
    restarted
        .mutate("enqueue", |c| c.enqueue("T2", "KOR", None))
        .await
        .unwrap();
    let overview = restarted
        .read(|c| c.changes_since(Some(token)))
        .await
        .unwrap()
        .expect("changes after restart");
    assert_eq!(overview.last_update, token + 3);

    // Restarting without any mutation still moves the counter
    let again = load_coordinator(&config, clock.clone()).unwrap();
    let counter = again.operation_counter().unwrap();
    assert_eq!(counter, token + 4);
    drop(again);
    let once_more = load_coordinator(&config, clock).unwrap();
    assert_eq!(once_more.operation_counter().unwrap(), counter + 1);
}

#[tokio::test]
async fn test_running_service_is_dropped_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1"]);
    let clock = Arc::new(ManualClock::new(EVENT_START));

    let service = file_service(&config, clock.clone());
    service
        .mutate("start", |c| c.start_service("T1", "GER"))
        .await
        .unwrap();

    let on_disk = load_table_snapshot(&config.storage.tables[0].path)
        .unwrap()
        .unwrap();
    assert_eq!(on_disk.status, TableStatus::Idle);
    assert!(on_disk.current_entity.is_none());

    let restarted = load_coordinator(&config, clock).unwrap();
    assert!(restarted.table("T1").unwrap().active_service().is_none());
}

#[tokio::test]
async fn test_running_service_kept_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixtures::file_config(dir.path(), &["T1"]);
    config.storage.keep_active_service = true;
    let clock = Arc::new(ManualClock::new(EVENT_START));

    let service = file_service(&config, clock.clone());
    service
        .mutate("start", |c| c.start_service("T1", "GER"))
        .await
        .unwrap();

    clock.advance(60);
    let mut restarted = load_coordinator(&config, clock).unwrap();
    let active = restarted.table("T1").unwrap().active_service().unwrap().clone();
    assert_eq!(active.entity, "GER");
    assert_eq!(active.started_at, EVENT_START);

    let correction = restarted.finish_service("T1").unwrap().unwrap();
    assert_eq!(correction.duration(), 60);
}

#[tokio::test]
async fn test_corrupt_table_file_aborts_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1"]);
    std::fs::write(&config.storage.tables[0].path, "{ not json").unwrap();

    let clock = Arc::new(ManualClock::new(EVENT_START));
    let err = load_coordinator(&config, clock).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CoordinationError>(),
        Some(CoordinationError::CorruptPersistedState { .. })
    ));
}

#[tokio::test]
async fn test_table_file_for_other_table_aborts_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixtures::file_config(dir.path(), &["T1"]);
    std::fs::write(
        &config.storage.tables[0].path,
        r#"{ "name": "T7", "queue": [], "status": "IDLE" }"#,
    )
    .unwrap();

    let clock = Arc::new(ManualClock::new(EVENT_START));
    assert!(load_coordinator(&config, clock).is_err());
}
