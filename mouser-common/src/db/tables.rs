//! Experiment file table definitions
//!
//! Single source of truth for the four tables of an experiment file.

use crate::db::schema::{ColumnDefinition, TableSchema};

/// Experiment metadata (exactly one row, id = 1)
pub struct ExperimentTable;

impl TableSchema for ExperimentTable {
    fn table_name() -> &'static str {
        "experiment"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("species", "TEXT").not_null().default("''"),
            ColumnDefinition::new("uses_rfid", "INTEGER").not_null().default("0"),
            // Expected total of subjects; the ingestor stops when reached
            ColumnDefinition::new("num_animals", "INTEGER").not_null(),
            ColumnDefinition::new("num_groups", "INTEGER").not_null(),
            ColumnDefinition::new("cage_max", "INTEGER").not_null(),
            ColumnDefinition::new("measurement", "TEXT"),
            // 0 = manual entry, 1 = automatic device
            ColumnDefinition::new("measurement_type", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("investigators", "TEXT").not_null().default("''"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }

    fn table_constraints() -> Vec<&'static str> {
        vec![
            "CHECK (id = 1)",
            "CHECK (num_animals >= 0)",
            "CHECK (num_groups > 0)",
            "CHECK (cage_max > 0)",
        ]
    }
}

/// Capacity-bounded groups (cages)
///
/// `num_animals` caches the count of active members; the CHECK keeps it
/// within capacity at the storage level too.
pub struct GroupsTable;

impl TableSchema for GroupsTable {
    fn table_name() -> &'static str {
        "cohort_groups"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("group_id", "INTEGER").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("num_animals", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("cage_capacity", "INTEGER").not_null(),
        ]
    }

    fn table_constraints() -> Vec<&'static str> {
        vec![
            "CHECK (cage_capacity > 0)",
            "CHECK (num_animals >= 0 AND num_animals <= cage_capacity)",
        ]
    }
}

/// Subjects
pub struct AnimalsTable;

impl TableSchema for AnimalsTable {
    fn table_name() -> &'static str {
        "animals"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("animal_id", "INTEGER").primary_key(),
            ColumnDefinition::new("group_id", "INTEGER"),
            ColumnDefinition::new("rfid", "TEXT"),
            ColumnDefinition::new("remarks", "TEXT").not_null().default("''"),
            ColumnDefinition::new("active", "INTEGER").not_null().default("1"),
        ]
    }

    fn table_constraints() -> Vec<&'static str> {
        vec![
            "CHECK (animal_id > 0)",
            "CHECK (active = 0 OR group_id IS NOT NULL)",
            "FOREIGN KEY (group_id) REFERENCES cohort_groups(group_id)",
        ]
    }

    fn indexes() -> Vec<&'static str> {
        vec![
            // Identifiers are unique among active subjects only
            "CREATE UNIQUE INDEX idx_animals_active_rfid ON animals(rfid) WHERE active = 1 AND rfid IS NOT NULL",
            "CREATE INDEX idx_animals_group ON animals(group_id, active)",
        ]
    }
}

/// Measurements; `used_for_sort` marks values consumed by auto-sort
pub struct MeasurementsTable;

impl TableSchema for MeasurementsTable {
    fn table_name() -> &'static str {
        "animal_measurements"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("measurement_id", "INTEGER").primary_key(),
            ColumnDefinition::new("animal_id", "INTEGER").not_null(),
            ColumnDefinition::new("timestamp", "TEXT").not_null(),
            ColumnDefinition::new("value", "REAL").not_null(),
            ColumnDefinition::new("used_for_sort", "INTEGER").not_null().default("0"),
        ]
    }

    fn table_constraints() -> Vec<&'static str> {
        vec!["FOREIGN KEY (animal_id) REFERENCES animals(animal_id) ON DELETE CASCADE"]
    }

    fn indexes() -> Vec<&'static str> {
        vec!["CREATE INDEX idx_measurements_animal ON animal_measurements(animal_id, used_for_sort)"]
    }
}

/// Names of every table an experiment file must contain
pub fn experiment_table_names() -> [&'static str; 4] {
    [
        ExperimentTable::table_name(),
        GroupsTable::table_name(),
        AnimalsTable::table_name(),
        MeasurementsTable::table_name(),
    ]
}
