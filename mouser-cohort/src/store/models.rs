//! Rows of an experiment file

use serde::{Deserialize, Serialize};

/// Experiment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Experiment {
    pub name: String,
    pub species: String,
    pub uses_rfid: bool,
    /// Expected total of subjects
    pub num_animals: i64,
    pub num_groups: i64,
    pub cage_max: i64,
    pub measurement: Option<String>,
    pub measurement_type: i64,
    pub investigators: String,
}

/// Input for creating the experiment row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentSetup {
    pub name: String,
    pub species: String,
    pub uses_rfid: bool,
    pub num_animals: i64,
    pub num_groups: i64,
    pub cage_max: i64,
    pub measurement: Option<String>,
    /// true when measurements come from a device rather than manual entry
    pub automatic_measurement: bool,
    pub investigators: Vec<String>,
}

/// Capacity-bounded group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub group_id: i64,
    pub name: String,
    /// Cached count of active members
    pub num_animals: i64,
    pub cage_capacity: i64,
}

impl Group {
    pub fn has_room(&self) -> bool {
        self.num_animals < self.cage_capacity
    }

    pub fn free_slots(&self) -> i64 {
        (self.cage_capacity - self.num_animals).max(0)
    }
}

/// Subject (animal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subject {
    pub animal_id: i64,
    pub group_id: Option<i64>,
    pub rfid: Option<String>,
    pub remarks: String,
    pub active: bool,
}

/// One recorded measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurement {
    pub measurement_id: i64,
    pub animal_id: i64,
    pub timestamp: String,
    pub value: f64,
    pub used_for_sort: bool,
}

/// Where a newly created subject landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub subject_id: i64,
    pub group_id: i64,
}

/// Cached counter that disagrees with the actual membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancyDrift {
    pub group_id: i64,
    pub cached: i64,
    pub actual: i64,
}
