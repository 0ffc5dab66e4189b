//! Shared fixtures for integration tests
#![allow(dead_code)]

use mouser_common::config::ListenerConfig;
use mouser_common::{CohortEvent, NotificationQueue};
use mouser_cohort::ingest::SimulatedScanner;
use mouser_cohort::store::{ExperimentSetup, StoreScope};
use mouser_cohort::{CohortService, StoreRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timings so tests do not wait on the defaults
pub fn fast_listener() -> ListenerConfig {
    ListenerConfig {
        read_timeout_ms: 20,
        poll_interval_ms: 5,
        notification_capacity: 256,
        ..ListenerConfig::default()
    }
}

pub struct Fixture {
    pub service: CohortService,
    pub scanner: SimulatedScanner,
    pub events: mpsc::Receiver<CohortEvent>,
}

pub fn group_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Cage {}", i)).collect()
}

pub fn experiment(expected_total: i64, groups: i64, capacity: i64) -> ExperimentSetup {
    ExperimentSetup {
        name: "Test".to_string(),
        species: "Mouse".to_string(),
        uses_rfid: true,
        num_animals: expected_total,
        num_groups: groups,
        cage_max: capacity,
        measurement: Some("Weight".to_string()),
        automatic_measurement: false,
        investigators: vec!["tester".to_string()],
    }
}

/// In-memory service with `groups` groups of `capacity` and the given expected total
pub async fn fixture(groups: usize, capacity: i64, expected_total: i64) -> Fixture {
    fixture_with(groups, capacity, expected_total, fast_listener()).await
}

pub async fn fixture_with(
    groups: usize,
    capacity: i64,
    expected_total: i64,
    listener: ListenerConfig,
) -> Fixture {
    let registry = StoreRegistry::default();
    let scanner = SimulatedScanner::new();
    let (queue, events) = NotificationQueue::new(listener.notification_capacity);

    let service = CohortService::open(
        &registry,
        StoreScope::InMemory,
        Arc::new(scanner.clone()),
        Arc::new(queue),
        &listener,
    )
    .await
    .unwrap();

    service
        .setup_experiment(&experiment(expected_total, groups as i64, capacity))
        .await
        .unwrap();
    service
        .setup_groups(&group_names(groups), capacity)
        .await
        .unwrap();

    Fixture {
        service,
        scanner,
        events,
    }
}

/// Skip events until one matches; panics on timeout
pub async fn wait_for_event<F>(events: &mut mpsc::Receiver<CohortEvent>, mut pred: F) -> CohortEvent
where
    F: FnMut(&CohortEvent) -> bool,
{
    let found = tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("notification queue closed before the expected event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Everything currently queued
pub fn drain(events: &mut mpsc::Receiver<CohortEvent>) -> Vec<CohortEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Group id → sorted member ids
pub fn members_by_group(assignments: &BTreeMap<i64, i64>) -> BTreeMap<i64, Vec<i64>> {
    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (subject, group) in assignments {
        groups.entry(*group).or_default().push(*subject);
    }
    groups
}

/// Capacity and counter invariants
pub async fn assert_capacity_invariants(service: &CohortService) {
    let drift = service.verify_occupancy().await.unwrap();
    assert!(drift.is_empty(), "occupancy counters drifted: {:?}", drift);

    for group in service.groups().await.unwrap() {
        assert!(
            group.num_animals <= group.cage_capacity,
            "group {} holds {} > {}",
            group.group_id,
            group.num_animals,
            group.cage_capacity
        );
    }
}
