//! Full service cycles driven through the coordinator

use crate::fixtures::{self, EVENT_START};
use std::sync::Arc;
use table_coordinator::error::CoordinationError;
use table_coordinator::history::CorrectionFilter;
use table_coordinator::types::TableStatus;
use table_coordinator::utils::ManualClock;

fn error_of(result: anyhow::Result<bool>) -> CoordinationError {
    result
        .unwrap_err()
        .downcast::<CoordinationError>()
        .expect("coordination error")
}

#[test]
fn test_complete_service_cycle() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock.clone());

    // Step 1: three entities queue at T1
    for entity in ["ITA", "ENG", "FRA"] {
        assert!(coordinator.enqueue("T1", entity, None).unwrap());
    }
    assert_eq!(coordinator.queue("T1").unwrap(), ["ITA", "ENG", "FRA"]);

    // Step 2: the table calls its head, which becomes unavailable elsewhere
    assert!(coordinator.switch_to_calling("T1").unwrap());
    assert!(coordinator.unavailable_entities().contains("ITA"));

    // Step 3: service starts and the entity leaves the queue
    assert!(coordinator.start_service("T1", "ITA").unwrap());
    let table = coordinator.table("T1").unwrap();
    assert_eq!(table.status(), TableStatus::Serving);
    assert_eq!(table.active_service().unwrap().entity, "ITA");
    assert_eq!(coordinator.queue("T1").unwrap(), ["ENG", "FRA"]);

    // Step 4: a second start is refused while serving
    assert!(!coordinator.start_service("T1", "ENG").unwrap());

    // Step 5: finishing records the service
    clock.advance(300);
    let correction = coordinator.finish_service("T1").unwrap().unwrap();
    assert_eq!(correction.entity, "ITA");
    assert_eq!(correction.duration(), 300);
    assert_eq!(coordinator.table("T1").unwrap().status(), TableStatus::Idle);
    assert!(coordinator.unavailable_entities().is_empty());

    // One real sample mixed with one a-priori sample of 600s
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 450.0);
    assert_eq!(
        coordinator
            .history_query(&CorrectionFilter::for_table("T1"))
            .unwrap(),
        vec![correction]
    );
}

#[test]
fn test_entity_queues_at_one_table_only() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock);

    assert!(coordinator.enqueue("T1", "ITA", None).unwrap());
    assert!(matches!(
        error_of(coordinator.enqueue("T2", "ITA", None)),
        CoordinationError::AlreadyQueued { table, .. } if table == "T1"
    ));
    assert!(matches!(
        error_of(coordinator.enqueue("T1", "ITA", None)),
        CoordinationError::AlreadyQueued { .. }
    ));
    assert!(matches!(
        error_of(coordinator.enqueue("T1", "NOPE", None)),
        CoordinationError::UnknownEntity { .. }
    ));
    assert!(matches!(
        error_of(coordinator.enqueue("T9", "ENG", None)),
        CoordinationError::UnknownTable { .. }
    ));

    // Once dequeued the entity may queue somewhere else
    assert!(coordinator.dequeue("T1", "ITA").unwrap());
    assert!(coordinator.enqueue("T2", "ITA", None).unwrap());
}

#[test]
fn test_served_entity_is_unavailable_elsewhere() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock);

    assert!(coordinator.start_service("T1", "KOR").unwrap());
    assert!(matches!(
        error_of(coordinator.enqueue("T2", "KOR", None)),
        CoordinationError::EntityUnavailable { .. }
    ));
    assert!(matches!(
        error_of(coordinator.start_service("T2", "KOR")),
        CoordinationError::EntityUnavailable { .. }
    ));
    assert!(matches!(
        error_of(coordinator.call_entity("T3", "KOR")),
        CoordinationError::EntityUnavailable { .. }
    ));

    coordinator.finish_service("T1").unwrap();
    assert!(coordinator.enqueue("T2", "KOR", None).unwrap());
}

#[test]
fn test_pause_returns_entity_to_end_of_queue() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock.clone());

    for entity in ["ENG", "FRA", "GER"] {
        coordinator.enqueue("T2", entity, None).unwrap();
    }
    assert!(coordinator.start_service("T2", "ENG").unwrap());
    assert_eq!(coordinator.queue("T2").unwrap(), ["FRA", "GER"]);

    clock.advance(120);
    let correction = coordinator.pause_service("T2").unwrap().unwrap();
    assert_eq!(correction.duration(), 120);
    assert_eq!(coordinator.queue("T2").unwrap(), ["FRA", "GER", "ENG"]);
    assert_eq!(coordinator.table("T2").unwrap().status(), TableStatus::Idle);

    // Nothing running any more
    assert!(coordinator.pause_service("T2").unwrap().is_none());
    assert!(coordinator.finish_service("T2").unwrap().is_none());
}

#[test]
fn test_skip_and_call_reorder_queue() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock).with_skip_distance(2);

    for entity in ["ITA", "ENG", "FRA", "GER"] {
        coordinator.enqueue("T3", entity, None).unwrap();
    }

    assert!(coordinator.skip_to_next("T3").unwrap());
    assert_eq!(coordinator.queue("T3").unwrap(), ["ENG", "FRA", "ITA", "GER"]);

    assert!(coordinator.call_entity("T3", "GER").unwrap());
    assert_eq!(coordinator.queue("T3").unwrap(), ["GER", "ENG", "FRA", "ITA"]);
    assert_eq!(coordinator.table("T3").unwrap().status(), TableStatus::Calling);

    assert!(coordinator.swap("T3", "ENG", "ITA").unwrap());
    assert_eq!(coordinator.queue("T3").unwrap(), ["GER", "ITA", "FRA", "ENG"]);

    assert!(coordinator.switch_to_idle("T3").unwrap());
    assert!(!coordinator.switch_to_idle("T3").unwrap());
}

#[test]
fn test_manual_history_edits_move_estimate() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock);

    assert_eq!(coordinator.expected_duration("T1").unwrap(), 600.0);

    let first = coordinator
        .history_add("ITA", "T1", EVENT_START, EVENT_START + 300)
        .unwrap();
    coordinator
        .history_add("ENG", "T1", EVENT_START + 400, EVENT_START + 900)
        .unwrap();
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 400.0);

    assert!(coordinator.history_delete(&first.id).unwrap());
    assert!(!coordinator.history_delete(&first.id).unwrap());
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 550.0);

    // Other tables keep the prior
    assert_eq!(coordinator.expected_duration("T2").unwrap(), 600.0);
}

#[test]
fn test_operation_counter_tracks_changes_only() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = fixtures::coordinator(clock);

    let before = coordinator.operation_counter().unwrap();
    assert!(coordinator.changes_since(Some(before)).unwrap().is_none());

    assert!(!coordinator.switch_to_calling("T1").unwrap());
    assert!(coordinator.enqueue("T1", "NOPE", None).is_err());
    assert_eq!(coordinator.operation_counter().unwrap(), before);

    coordinator.enqueue("T1", "USA", None).unwrap();
    let overview = coordinator.changes_since(Some(before)).unwrap().unwrap();
    assert_eq!(overview.last_update, before + 1);
    assert_eq!(overview.tables.len(), 3);

    // Starting a queued entity is one change even though it also leaves the queue
    assert!(coordinator.start_service("T1", "USA").unwrap());
    assert_eq!(coordinator.operation_counter().unwrap(), before + 2);
    assert!(coordinator.queue("T1").unwrap().is_empty());

    // Pausing is one change too
    assert!(coordinator.pause_service("T1").unwrap().is_some());
    assert_eq!(coordinator.operation_counter().unwrap(), before + 3);
}
