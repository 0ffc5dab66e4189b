//! mouser-cohort - Cohort assignment and identification ingestion
//!
//! Places subjects into capacity-limited groups, rebalances them by
//! measurement or at random, and ingests RFID scans from a device into the
//! same assignment model.

pub mod ingest;
pub mod planner;
pub mod service;
pub mod sort;
pub mod store;

pub use planner::{next_subject_id, CapacityPlanner};
pub use service::CohortService;
pub use store::{AssignmentStore, StoreHandle, StoreRegistry, StoreScope};
