//! Assignment store
//!
//! Durable record of one experiment: metadata, groups, subjects and
//! measurements. Reads go straight to the pool. Every mutation goes through
//! [`AssignmentStore::begin_write`], which serializes writers on an async
//! mutex and then opens a SQLite transaction.

pub mod models;
pub mod registry;
pub mod retry;
pub mod txn;

pub use models::{
    Experiment, ExperimentSetup, Group, Measurement, OccupancyDrift, Placement, Subject,
};
pub use registry::{StoreHandle, StoreRegistry, StoreScope};
pub use retry::retry_store_write;
pub use txn::WriteTxn;

use crate::ingest::normalize_identifier;
use chrono::{DateTime, SecondsFormat, Utc};
use mouser_common::config::StoreConfig;
use mouser_common::db::{init_database, init_in_memory_database};
use mouser_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Timestamp format stored in `animal_measurements.timestamp`
///
/// Fixed width and UTC so that text ordering matches time ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct AssignmentStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    path: Option<PathBuf>,
}

impl AssignmentStore {
    /// Open (or create) an experiment file
    pub async fn open_file(path: &Path, config: &StoreConfig) -> Result<Self> {
        let pool = init_database(path, config).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory store
    pub async fn open_in_memory() -> Result<Self> {
        let pool = init_in_memory_database().await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            path: None,
        })
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(path = ?self.path, "Closed assignment store");
        }
    }

    /// Enter the single-writer critical section
    ///
    /// Callers must not read through the pool while holding the returned
    /// transaction; use its own read methods instead.
    pub async fn begin_write(&self) -> Result<WriteTxn<'_>> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn::new(tx, guard))
    }

    // ---- reads ----

    pub async fn experiment(&self) -> Result<Option<Experiment>> {
        let experiment = sqlx::query_as::<_, Experiment>(
            r#"
            SELECT name, species, uses_rfid, num_animals, num_groups, cage_max,
                   measurement, measurement_type, investigators
            FROM experiment WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(experiment)
    }

    /// Expected total of subjects (0 before setup)
    pub async fn expected_total(&self) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT num_animals FROM experiment WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(total.unwrap_or(0))
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(
            "SELECT group_id, name, num_animals, cage_capacity FROM cohort_groups ORDER BY group_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    pub async fn group(&self, group_id: i64) -> Result<Group> {
        sqlx::query_as::<_, Group>(
            "SELECT group_id, name, num_animals, cage_capacity FROM cohort_groups WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))
    }

    /// Cached occupancy counter of one group
    pub async fn occupancy(&self, group_id: i64) -> Result<i64> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT num_animals FROM cohort_groups WHERE group_id = ?")
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await?;
        count.ok_or_else(|| Error::NotFound(format!("group {}", group_id)))
    }

    /// Every subject, active or not
    pub async fn subjects(&self) -> Result<Vec<Subject>> {
        let subjects = sqlx::query_as::<_, Subject>(
            "SELECT animal_id, group_id, rfid, remarks, active FROM animals ORDER BY animal_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subjects)
    }

    pub async fn subject(&self, subject_id: i64) -> Result<Subject> {
        sqlx::query_as::<_, Subject>(
            "SELECT animal_id, group_id, rfid, remarks, active FROM animals WHERE animal_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))
    }

    /// Active members of one group
    pub async fn subjects_in_group(&self, group_id: i64) -> Result<Vec<Subject>> {
        let subjects = sqlx::query_as::<_, Subject>(
            r#"
            SELECT animal_id, group_id, rfid, remarks, active
            FROM animals WHERE group_id = ? AND active = 1
            ORDER BY animal_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subjects)
    }

    pub async fn active_subject_by_rfid(&self, rfid: &str) -> Result<Option<Subject>> {
        let subject = sqlx::query_as::<_, Subject>(
            "SELECT animal_id, group_id, rfid, remarks, active FROM animals WHERE rfid = ? AND active = 1",
        )
        .bind(rfid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subject)
    }

    /// Active subject id → group id
    pub async fn assignments(&self) -> Result<BTreeMap<i64, i64>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT animal_id, group_id FROM animals WHERE active = 1 AND group_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn count_active_with_rfid(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM animals WHERE active = 1 AND rfid IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn measurements(&self, subject_id: i64) -> Result<Vec<Measurement>> {
        let rows = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT measurement_id, animal_id, timestamp, value, used_for_sort
            FROM animal_measurements WHERE animal_id = ?
            ORDER BY timestamp, measurement_id
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Groups whose cached counter disagrees with their active membership
    pub async fn verify_occupancy(&self) -> Result<Vec<OccupancyDrift>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT g.group_id, g.num_animals,
                   (SELECT COUNT(*) FROM animals a WHERE a.group_id = g.group_id AND a.active = 1)
            FROM cohort_groups g
            ORDER BY g.group_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|(_, cached, actual)| cached != actual)
            .map(|(group_id, cached, actual)| OccupancyDrift {
                group_id,
                cached,
                actual,
            })
            .collect())
    }

    // ---- writes ----

    /// Create the single experiment row
    pub async fn setup_experiment(&self, setup: &ExperimentSetup) -> Result<()> {
        if setup.name.trim().is_empty() {
            return Err(Error::InvalidInput("experiment name is empty".to_string()));
        }
        if setup.num_animals < 0 {
            return Err(Error::InvalidInput("subject count must be >= 0".to_string()));
        }
        if setup.num_groups <= 0 || setup.cage_max <= 0 {
            return Err(Error::InvalidInput(
                "group count and cage capacity must be > 0".to_string(),
            ));
        }

        let mut txn = self.begin_write().await?;
        let exists: Option<i64> = txn.experiment_row_id().await?;
        if exists.is_some() {
            return Err(Error::InvalidInput("experiment is already set up".to_string()));
        }
        txn.insert_experiment(setup, &format_timestamp(&Utc::now())).await?;
        txn.commit().await?;

        info!(
            name = %setup.name,
            num_animals = setup.num_animals,
            num_groups = setup.num_groups,
            "Experiment set up"
        );
        Ok(())
    }

    /// Create one group per name with ids 1..=n
    pub async fn setup_groups(&self, names: &[String], capacity: i64) -> Result<Vec<Group>> {
        if names.is_empty() {
            return Err(Error::InvalidInput("no group names given".to_string()));
        }
        if capacity <= 0 {
            return Err(Error::InvalidInput(format!(
                "capacity must be > 0, got {}",
                capacity
            )));
        }
        if let Some(pos) = names.iter().position(|n| n.trim().is_empty()) {
            return Err(Error::InvalidInput(format!("group name {} is empty", pos + 1)));
        }

        let mut txn = self.begin_write().await?;
        if !txn.groups().await?.is_empty() {
            return Err(Error::InvalidInput("groups are already set up".to_string()));
        }
        for (idx, name) in names.iter().enumerate() {
            txn.insert_group(idx as i64 + 1, name.trim(), capacity).await?;
        }
        let groups = txn.groups().await?;
        txn.commit().await?;

        info!(count = groups.len(), capacity, "Groups set up");
        Ok(groups)
    }

    /// Record a measurement; returns its id
    pub async fn add_measurement(
        &self,
        subject_id: i64,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<i64> {
        if !value.is_finite() {
            return Err(Error::InvalidInput(format!(
                "measurement value {} is not finite",
                value
            )));
        }

        let mut txn = self.begin_write().await?;
        if txn.subject(subject_id).await?.is_none() {
            return Err(Error::NotFound(format!("subject {}", subject_id)));
        }
        let id = txn
            .insert_measurement(subject_id, &format_timestamp(&timestamp), value)
            .await?;
        txn.commit().await?;

        debug!(subject_id, measurement_id = id, value, "Measurement recorded");
        Ok(id)
    }

    /// Replace (or clear) the identifier of an active subject
    pub async fn change_identifier(&self, subject_id: i64, new_rfid: Option<&str>) -> Result<()> {
        let rfid = match new_rfid {
            Some(raw) => Some(normalize_identifier(raw).ok_or_else(|| {
                Error::InvalidInput(format!("identifier {:?} is empty after normalization", raw))
            })?),
            None => None,
        };

        let mut txn = self.begin_write().await?;
        let subject = txn
            .subject(subject_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))?;
        if !subject.active {
            return Err(Error::InvalidInput(format!(
                "subject {} is inactive",
                subject_id
            )));
        }

        if let Some(rfid) = rfid.as_deref() {
            if let Some(owner) = txn.active_rfid_owner(rfid).await? {
                if owner != subject_id {
                    return Err(Error::DuplicateIdentifier(rfid.to_string()));
                }
            }
        }

        txn.set_subject_rfid(subject_id, rfid.as_deref()).await?;
        txn.commit().await?;

        info!(subject_id, rfid = ?rfid, "Identifier changed");
        Ok(())
    }

    /// Soft delete: frees the group slot, keeps the id reserved
    ///
    /// Deactivating an inactive subject is a no-op.
    pub async fn deactivate_subject(&self, subject_id: i64) -> Result<()> {
        let mut txn = self.begin_write().await?;
        let subject = txn
            .subject(subject_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))?;
        if !subject.active {
            return Ok(());
        }

        txn.set_subject_active(subject_id, false).await?;
        if let Some(group_id) = subject.group_id {
            txn.adjust_occupancy(group_id, -1).await?;
        }
        txn.commit().await?;

        info!(subject_id, group_id = ?subject.group_id, "Subject deactivated");
        Ok(())
    }

    /// Hard delete of a subject and its measurements
    pub async fn remove_subject(&self, subject_id: i64) -> Result<()> {
        let mut txn = self.begin_write().await?;
        let subject = txn
            .subject(subject_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))?;

        txn.delete_subject(subject_id).await?;
        if subject.active {
            if let Some(group_id) = subject.group_id {
                txn.adjust_occupancy(group_id, -1).await?;
            }
        }
        txn.commit().await?;

        info!(subject_id, "Subject removed");
        Ok(())
    }
}
