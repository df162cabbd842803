//! Test fixtures shared by the integration and load tests

use std::path::Path;
use std::sync::Arc;
use table_coordinator::config::{AppConfig, TableSettings};
use table_coordinator::coordinator::Coordinator;
use table_coordinator::estimate::{EstimatorConfig, HistoricalDurationEstimator};
use table_coordinator::history::{Correction, CorrectionLog};
use table_coordinator::metrics::MetricsCollector;
use table_coordinator::persistence::{dump_roster, InMemoryStatePersister};
use table_coordinator::service::CoordinationService;
use table_coordinator::table::{TableContext, TableIdentity};
use table_coordinator::utils::ManualClock;

pub const EVENT_START: i64 = 1_700_000_000;

pub fn roster() -> Vec<String> {
    ["ITA", "ENG", "FRA", "GER", "KOR", "USA", "BRA", "JPN"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Two-sample prior of 600s, no clamping, a four hour event
pub fn estimator_config() -> EstimatorConfig {
    EstimatorConfig {
        min_sample_count: 2,
        a_priori_duration_seconds: 600.0,
        min_duration_seconds: 0.0,
        max_duration_seconds: 1_000_000.0,
        event_start: EVENT_START,
        event_end: EVENT_START + 4 * 3600,
        breaks: Vec::new(),
    }
}

pub fn context(clock: Arc<ManualClock>, history: Vec<Correction>, config: EstimatorConfig) -> TableContext {
    TableContext::new(
        CorrectionLog::from_corrections(history).into_shared(),
        Arc::new(HistoricalDurationEstimator::new(config).expect("valid estimator config")),
        clock,
    )
}

pub fn tables(names: &[&str]) -> Vec<TableIdentity> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| TableIdentity::new(*name, format!("Problem {}", i + 1), vec![]))
        .collect()
}

/// Coordinator over tables T1..T3 with an empty history
pub fn coordinator(clock: Arc<ManualClock>) -> Coordinator {
    Coordinator::new(
        roster(),
        tables(&["T1", "T2", "T3"]),
        context(clock, Vec::new(), estimator_config()),
    )
    .expect("coordinator")
}

/// Service handle with an in-memory persister
pub struct TestService {
    pub clock: Arc<ManualClock>,
    pub persister: Arc<InMemoryStatePersister>,
    pub service: CoordinationService,
}

impl TestService {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(EVENT_START));
        let persister = Arc::new(InMemoryStatePersister::new());
        let service = CoordinationService::new(
            coordinator(clock.clone()),
            persister.clone(),
            Arc::new(MetricsCollector::new().expect("metrics collector")),
        );
        Self {
            clock,
            persister,
            service,
        }
    }
}

/// Configuration whose state files live under `dir`, with a seeded roster
pub fn file_config(dir: &Path, table_names: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.service.http_host = "127.0.0.1".to_string();
    config.storage.roster_path = dir.join("roster.csv");
    config.storage.history_path = dir.join("history.csv");
    config.storage.tables = table_names
        .iter()
        .map(|name| TableSettings {
            name: name.to_string(),
            path: dir.join(format!("{}.json", name)),
            topic: format!("Problem {}", name),
            operators: vec!["Alice".to_string()],
        })
        .collect();
    config.estimation = estimator_config();

    dump_roster(&roster(), &config.storage.roster_path, false).expect("seed roster");
    config
}
