//! Expected durations under the event's time budget

use crate::fixtures::{self, EVENT_START};
use std::sync::Arc;
use table_coordinator::coordinator::Coordinator;
use table_coordinator::estimate::EstimatorConfig;
use table_coordinator::history::Correction;
use table_coordinator::types::BreakInterval;
use table_coordinator::utils::ManualClock;

const EVENT_END: i64 = EVENT_START + 4 * 3600;

fn coordinator_with(
    clock: Arc<ManualClock>,
    history: Vec<Correction>,
    config: EstimatorConfig,
) -> Coordinator {
    Coordinator::new(
        fixtures::roster(),
        fixtures::tables(&["T1", "T2"]),
        fixtures::context(clock, history, config),
    )
    .unwrap()
}

fn fill_queue(coordinator: &mut Coordinator, table: &str, entities: &[&str]) {
    for entity in entities {
        coordinator.enqueue(table, entity, None).unwrap();
    }
}

#[test]
fn test_estimate_uses_history_of_its_table_only() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let history = vec![
        Correction::new("ITA", "T1", EVENT_START - 900, EVENT_START - 700).unwrap(),
        Correction::new("ENG", "T1", EVENT_START - 600, EVENT_START - 200).unwrap(),
        Correction::new("FRA", "T1", EVENT_START - 1800, EVENT_START - 1500).unwrap(),
    ];
    let coordinator = coordinator_with(clock, history, fixtures::estimator_config());

    // Three samples exceed the prior's weight: plain mean of 200, 400, 300
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 300.0);
    assert_eq!(coordinator.expected_duration("T2").unwrap(), 600.0);

    let stats = coordinator.table_stats().unwrap();
    let t1 = stats.iter().find(|s| s.table == "T1").unwrap();
    assert_eq!(t1.completed_services, 3);
    assert_eq!(t1.min_duration_seconds, Some(200.0));
    assert_eq!(t1.max_duration_seconds, Some(400.0));
}

#[test]
fn test_estimate_compresses_near_the_end() {
    let clock = Arc::new(ManualClock::new(EVENT_START));
    let mut coordinator = coordinator_with(clock.clone(), Vec::new(), fixtures::estimator_config());
    fill_queue(&mut coordinator, "T1", &["ITA", "ENG", "FRA"]);
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 600.0);

    // 900 seconds left for three entities
    clock.set(EVENT_END - 900);
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 600.0);
    coordinator.refresh_estimates().unwrap();
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 300.0);

    // An empty queue is never compressed
    assert_eq!(coordinator.expected_duration("T2").unwrap(), 600.0);
}

#[test]
fn test_breaks_shrink_the_budget() {
    let clock = Arc::new(ManualClock::new(EVENT_END - 900));
    let config = EstimatorConfig {
        breaks: vec![BreakInterval::new(EVENT_END - 600, EVENT_END - 300)],
        ..fixtures::estimator_config()
    };
    let mut coordinator = coordinator_with(clock.clone(), Vec::new(), config);
    fill_queue(&mut coordinator, "T1", &["ITA", "ENG", "FRA"]);

    // 900s left minus a 300s break, split between three entities
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 200.0);

    // Inside the break only its remainder is excluded
    clock.set(EVENT_END - 450);
    coordinator.refresh_estimates().unwrap();
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 100.0);
}

#[test]
fn test_estimate_is_clamped() {
    let clock = Arc::new(ManualClock::new(EVENT_END - 30));
    let config = EstimatorConfig {
        min_duration_seconds: 60.0,
        max_duration_seconds: 500.0,
        ..fixtures::estimator_config()
    };
    let mut coordinator = coordinator_with(clock.clone(), Vec::new(), config);

    // Prior of 600s is above the ceiling
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 500.0);

    // 30s left for two entities would be 15s, raised to the floor
    fill_queue(&mut coordinator, "T1", &["ITA", "ENG"]);
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 60.0);

    // After the end the budget is zero
    clock.set(EVENT_END + 100);
    coordinator.refresh_estimates().unwrap();
    assert_eq!(coordinator.expected_duration("T1").unwrap(), 60.0);
}
