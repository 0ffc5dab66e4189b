//! Capacity planner
//!
//! Owns the "no group exceeds its capacity" rule for single-subject moves
//! and new placements. Every check that guards a write runs again inside
//! the write transaction, so concurrent callers (ingestor, manual entry,
//! rebalancing) cannot overfill a group between check and commit.

use crate::ingest::normalize_identifier;
use crate::store::{AssignmentStore, Group, Placement};
use mouser_common::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CapacityPlanner {
    store: Arc<AssignmentStore>,
}

impl CapacityPlanner {
    pub fn new(store: Arc<AssignmentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    /// Cached occupancy counter
    pub async fn occupancy(&self, group_id: i64) -> Result<i64> {
        self.store.occupancy(group_id).await
    }

    /// Lowest group id with spare capacity
    pub async fn find_next_available_group(&self) -> Result<Option<i64>> {
        let groups = self.store.groups().await?;
        Ok(first_available(&groups))
    }

    /// Move an active subject into `group_id`
    ///
    /// Moving a subject into its current group is a no-op.
    pub async fn assign(&self, subject_id: i64, group_id: i64) -> Result<()> {
        let mut txn = self.store.begin_write().await?;

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

        let target = txn
            .group(group_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;

        if subject.group_id == Some(group_id) {
            return Ok(());
        }
        if !target.has_room() {
            return Err(Error::group_full(group_id));
        }

        txn.set_subject_group(subject_id, group_id).await?;
        if let Some(old) = subject.group_id {
            txn.adjust_occupancy(old, -1).await?;
        }
        txn.adjust_occupancy(group_id, 1).await?;
        txn.commit().await?;

        info!(subject_id, from = ?subject.group_id, to = group_id, "Subject reassigned");
        Ok(())
    }

    /// Create a subject in the first group with room
    ///
    /// Duplicate check, group choice, id gap-fill, insert and counter
    /// increment all happen in one write transaction.
    pub async fn place_new_subject(&self, rfid: Option<&str>, remarks: &str) -> Result<Placement> {
        let rfid = match rfid {
            Some(raw) => Some(normalize_identifier(raw).ok_or_else(|| {
                Error::InvalidInput(format!("identifier {:?} is empty after normalization", raw))
            })?),
            None => None,
        };

        let mut txn = self.store.begin_write().await?;

        if let Some(rfid) = rfid.as_deref() {
            if txn.active_rfid_owner(rfid).await?.is_some() {
                return Err(Error::DuplicateIdentifier(rfid.to_string()));
            }
        }

        let groups = txn.groups().await?;
        let group_id = first_available(&groups).ok_or_else(|| Error::CapacityExceeded {
            group_id: None,
            reason: if groups.is_empty() {
                "no groups are set up".to_string()
            } else {
                "every group is full".to_string()
            },
        })?;

        let taken = txn.taken_subject_ids().await?;
        let expected_total = txn.expected_total().await?;
        let subject_id = next_subject_id(&taken, expected_total);

        txn.insert_subject(subject_id, group_id, rfid.as_deref(), remarks)
            .await?;
        txn.adjust_occupancy(group_id, 1).await?;
        txn.commit().await?;

        debug!(subject_id, group_id, rfid = ?rfid, "Subject placed");
        Ok(Placement {
            subject_id,
            group_id,
        })
    }
}

/// First group (by ascending id) with `occupancy < capacity`
pub fn first_available(groups: &[Group]) -> Option<i64> {
    groups
        .iter()
        .filter(|g| g.has_room())
        .map(|g| g.group_id)
        .min()
}

/// Gap-filled subject id
///
/// The smallest id in `1..=expected_total` not yet taken; once that range
/// is exhausted, the first id above both `expected_total` and the largest
/// taken id.
pub fn next_subject_id(taken: &BTreeSet<i64>, expected_total: i64) -> i64 {
    if let Some(id) = (1..=expected_total).find(|id| !taken.contains(id)) {
        return id;
    }
    let max_taken = taken.iter().next_back().copied().unwrap_or(0);
    max_taken.max(expected_total) + 1
}
