//! Single-writer transaction
//!
//! A [`WriteTxn`] holds the store's write lock for its whole lifetime and
//! wraps one SQLite transaction. Dropping it without [`WriteTxn::commit`]
//! rolls back, then releases the lock.

use super::models::{Group, Subject};
use mouser_common::Result;
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeSet;
use tokio::sync::MutexGuard;

pub struct WriteTxn<'a> {
    // Declared before the guard so the rollback happens while the lock is held
    tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, guard: MutexGuard<'a, ()>) -> Self {
        Self { tx, _guard: guard }
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Expected total of subjects (0 before the experiment row exists)
    pub async fn expected_total(&mut self) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT num_animals FROM experiment WHERE id = 1")
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(total.unwrap_or(0))
    }

    pub async fn experiment_row_id(&mut self) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM experiment WHERE id = 1")
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    /// All groups in ascending id order
    pub async fn groups(&mut self) -> Result<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(
            "SELECT group_id, name, num_animals, cage_capacity FROM cohort_groups ORDER BY group_id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(groups)
    }

    pub async fn group(&mut self, group_id: i64) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            "SELECT group_id, name, num_animals, cage_capacity FROM cohort_groups WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(group)
    }

    pub async fn subject(&mut self, subject_id: i64) -> Result<Option<Subject>> {
        let subject = sqlx::query_as::<_, Subject>(
            "SELECT animal_id, group_id, rfid, remarks, active FROM animals WHERE animal_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(subject)
    }

    /// Active subjects as (subject id, group id)
    pub async fn active_members(&mut self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT animal_id, group_id FROM animals WHERE active = 1 ORDER BY animal_id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    /// Active subject currently holding `rfid`
    pub async fn active_rfid_owner(&mut self, rfid: &str) -> Result<Option<i64>> {
        let owner = sqlx::query_scalar(
            "SELECT animal_id FROM animals WHERE rfid = ? AND active = 1",
        )
        .bind(rfid)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(owner)
    }

    /// Every id in use, active or not (inactive ids stay reserved)
    pub async fn taken_subject_ids(&mut self) -> Result<BTreeSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT animal_id FROM animals")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Most recent measurement not yet consumed by auto-sort, per active subject
    ///
    /// Returns (subject id, measurement id, value). Ties on timestamp go to the
    /// later-recorded measurement.
    pub async fn latest_unused_measurements(&mut self) -> Result<Vec<(i64, i64, f64)>> {
        let rows = sqlx::query_as::<_, (i64, i64, f64)>(
            r#"
            SELECT m.animal_id, m.measurement_id, m.value
            FROM animal_measurements m
            JOIN animals a ON a.animal_id = m.animal_id
            WHERE a.active = 1
              AND m.measurement_id = (
                  SELECT m2.measurement_id
                  FROM animal_measurements m2
                  WHERE m2.animal_id = m.animal_id AND m2.used_for_sort = 0
                  ORDER BY m2.timestamp DESC, m2.measurement_id DESC
                  LIMIT 1
              )
            ORDER BY m.animal_id
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn insert_group(&mut self, group_id: i64, name: &str, capacity: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO cohort_groups (group_id, name, num_animals, cage_capacity) VALUES (?, ?, 0, ?)",
        )
        .bind(group_id)
        .bind(name)
        .bind(capacity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn insert_subject(
        &mut self,
        subject_id: i64,
        group_id: i64,
        rfid: Option<&str>,
        remarks: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO animals (animal_id, group_id, rfid, remarks, active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(subject_id)
        .bind(group_id)
        .bind(rfid)
        .bind(remarks)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn set_subject_group(&mut self, subject_id: i64, group_id: i64) -> Result<()> {
        sqlx::query("UPDATE animals SET group_id = ? WHERE animal_id = ?")
            .bind(group_id)
            .bind(subject_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn set_subject_rfid(&mut self, subject_id: i64, rfid: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE animals SET rfid = ? WHERE animal_id = ?")
            .bind(rfid)
            .bind(subject_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn set_subject_active(&mut self, subject_id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE animals SET active = ? WHERE animal_id = ?")
            .bind(active)
            .bind(subject_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn delete_subject(&mut self, subject_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM animal_measurements WHERE animal_id = ?")
            .bind(subject_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM animals WHERE animal_id = ?")
            .bind(subject_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn adjust_occupancy(&mut self, group_id: i64, delta: i64) -> Result<()> {
        sqlx::query("UPDATE cohort_groups SET num_animals = num_animals + ? WHERE group_id = ?")
            .bind(delta)
            .bind(group_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Rebuild every cached counter from membership
    pub async fn recount_occupancy(&mut self) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cohort_groups SET num_animals = (
                SELECT COUNT(*) FROM animals a
                WHERE a.group_id = cohort_groups.group_id AND a.active = 1
            )
            "#,
        )
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn mark_measurement_used(&mut self, measurement_id: i64) -> Result<()> {
        sqlx::query("UPDATE animal_measurements SET used_for_sort = 1 WHERE measurement_id = ?")
            .bind(measurement_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn insert_measurement(
        &mut self,
        subject_id: i64,
        timestamp: &str,
        value: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO animal_measurements (animal_id, timestamp, value, used_for_sort) VALUES (?, ?, ?, 0)",
        )
        .bind(subject_id)
        .bind(timestamp)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub(crate) async fn insert_experiment(
        &mut self,
        setup: &super::models::ExperimentSetup,
        created_at: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO experiment (
                id, name, species, uses_rfid, num_animals, num_groups,
                cage_max, measurement, measurement_type, investigators, created_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&setup.name)
        .bind(&setup.species)
        .bind(setup.uses_rfid)
        .bind(setup.num_animals)
        .bind(setup.num_groups)
        .bind(setup.cage_max)
        .bind(&setup.measurement)
        .bind(i64::from(setup.automatic_measurement))
        .bind(setup.investigators.join(", "))
        .bind(created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
