//! Many concurrent requests against one coordination service

use crate::fixtures::{self, TestService};
use futures::future::join_all;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueues_keep_one_queue_per_entity() {
    let test = TestService::new();
    let tables = ["T1", "T2", "T3"];

    // Every entity tries to queue at every table at once
    let requests = fixtures::roster().into_iter().flat_map(|entity| {
        tables.iter().map(move |table| (table.to_string(), entity.clone()))
    });
    let results = join_all(requests.map(|(table, entity)| {
        let service = test.service.clone();
        async move {
            service
                .mutate("enqueue", |c| c.enqueue(&table, &entity, None))
                .await
        }
    }))
    .await;

    let applied = results.iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(applied, fixtures::roster().len());
    assert_eq!(
        results.iter().filter(|r| r.is_err()).count(),
        fixtures::roster().len() * (tables.len() - 1)
    );

    let mut seen = HashSet::new();
    for table in tables {
        for entity in test.service.read(|c| c.queue(table)).await.unwrap() {
            assert!(seen.insert(entity), "entity queued twice");
        }
    }
    assert_eq!(seen.len(), fixtures::roster().len());

    // One counter bump and one persisted snapshot per applied request
    let counter = test.service.read(|c| c.operation_counter()).await.unwrap();
    assert_eq!(counter, applied as u64);
    assert_eq!(test.persister.count().unwrap(), applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_services_at_all_tables() {
    let test = TestService::new();
    let assignments = [("T1", "ITA"), ("T2", "ENG"), ("T3", "FRA")];

    let started = join_all(assignments.iter().map(|(table, entity)| {
        let service = test.service.clone();
        async move {
            service
                .mutate("start", |c| c.start_service(table, entity))
                .await
        }
    }))
    .await;
    assert!(started.into_iter().all(|r| r.unwrap()));
    assert_eq!(
        test.service.read(|c| c.unavailable_entities()).await.len(),
        3
    );

    test.clock.advance(240);
    let finished = join_all(assignments.iter().map(|(table, _)| {
        let service = test.service.clone();
        async move {
            service
                .mutate("finish", |c| c.finish_service(table))
                .await
        }
    }))
    .await;

    for result in finished {
        let correction = result.unwrap().unwrap();
        assert_eq!(correction.duration(), 240);
    }
    let history = test
        .service
        .read(|c| c.history_query(&Default::default()))
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(test.service.read(|c| c.unavailable_entities()).await.is_empty());
}
