//! Cohort service
//!
//! Entry point for the surrounding application. One service wraps one
//! experiment store; the planner, both rebalancing engines and the
//! ingestor all share that store's write lock.

use crate::ingest::{DeviceConnector, IdentificationIngestor, ListenerHandle};
use crate::planner::CapacityPlanner;
use crate::sort::{AutoSortEngine, RandomizeEngine, SortOutcome};
use crate::store::{
    AssignmentStore, Experiment, ExperimentSetup, Group, OccupancyDrift, StoreHandle,
    StoreRegistry, StoreScope, Subject,
};
use chrono::{DateTime, Utc};
use mouser_common::config::ListenerConfig;
use mouser_common::{ListenerState, NotificationSink, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct CohortService {
    registry: StoreRegistry,
    handle: StoreHandle,
    planner: CapacityPlanner,
    auto_sort: AutoSortEngine,
    randomize: RandomizeEngine,
    ingestor: IdentificationIngestor,
}

impl CohortService {
    /// Acquire the store for `scope` and wire up the engines
    pub async fn open(
        registry: &StoreRegistry,
        scope: StoreScope,
        connector: Arc<dyn DeviceConnector>,
        sink: Arc<dyn NotificationSink>,
        listener: &ListenerConfig,
    ) -> Result<Self> {
        listener.validate()?;

        let handle = registry.acquire(scope).await?;
        let store = handle.store();
        let planner = CapacityPlanner::new(store.clone());

        Ok(Self {
            registry: registry.clone(),
            auto_sort: AutoSortEngine::new(store.clone()),
            randomize: RandomizeEngine::new(store),
            ingestor: IdentificationIngestor::new(planner.clone(), connector, sink, listener),
            planner,
            handle,
        })
    }

    pub fn store(&self) -> &AssignmentStore {
        &self.handle
    }

    pub fn planner(&self) -> &CapacityPlanner {
        &self.planner
    }

    // ---- setup ----

    pub async fn setup_experiment(&self, setup: &ExperimentSetup) -> Result<()> {
        self.handle.setup_experiment(setup).await
    }

    pub async fn setup_groups(&self, names: &[String], capacity: i64) -> Result<Vec<Group>> {
        self.handle.setup_groups(names, capacity).await
    }

    // ---- subjects ----

    /// Manually add a subject; returns its id
    pub async fn add_subject(&self, identifier: Option<&str>, remarks: &str) -> Result<i64> {
        let placement = self.planner.place_new_subject(identifier, remarks).await?;
        Ok(placement.subject_id)
    }

    pub async fn assign(&self, subject_id: i64, group_id: i64) -> Result<()> {
        self.planner.assign(subject_id, group_id).await
    }

    pub async fn remove_subject(&self, subject_id: i64) -> Result<()> {
        self.handle.remove_subject(subject_id).await
    }

    pub async fn deactivate_subject(&self, subject_id: i64) -> Result<()> {
        self.handle.deactivate_subject(subject_id).await
    }

    pub async fn change_identifier(&self, subject_id: i64, rfid: Option<&str>) -> Result<()> {
        self.handle.change_identifier(subject_id, rfid).await
    }

    pub async fn add_measurement(
        &self,
        subject_id: i64,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<i64> {
        self.handle.add_measurement(subject_id, timestamp, value).await
    }

    // ---- rebalancing ----

    pub async fn auto_sort(&self) -> Result<SortOutcome> {
        self.auto_sort.run().await
    }

    pub async fn randomize(&self) -> Result<BTreeMap<i64, i64>> {
        self.randomize.run().await
    }

    pub async fn randomize_with_rng<R: Rng + Send>(&self, rng: &mut R) -> Result<BTreeMap<i64, i64>> {
        self.randomize.run_with_rng(rng).await
    }

    // ---- ingestion ----

    pub async fn start_listening(&self) -> Result<ListenerHandle> {
        self.ingestor.start_listening().await
    }

    pub async fn stop_listening(&self) {
        self.ingestor.stop_listening().await
    }

    pub async fn listener_state(&self) -> ListenerState {
        self.ingestor.state().await
    }

    // ---- queries ----

    /// Active subject id → group id
    pub async fn get_assignments(&self) -> Result<BTreeMap<i64, i64>> {
        self.handle.assignments().await
    }

    pub async fn experiment(&self) -> Result<Option<Experiment>> {
        self.handle.experiment().await
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        self.handle.groups().await
    }

    pub async fn subjects(&self) -> Result<Vec<Subject>> {
        self.handle.subjects().await
    }

    pub async fn subjects_in_group(&self, group_id: i64) -> Result<Vec<Subject>> {
        self.handle.subjects_in_group(group_id).await
    }

    pub async fn verify_occupancy(&self) -> Result<Vec<OccupancyDrift>> {
        self.handle.verify_occupancy().await
    }

    /// Stop listening and release the store
    pub async fn close(self) {
        self.ingestor.stop_listening().await;
        self.registry.release(&self.handle).await;
    }
}
