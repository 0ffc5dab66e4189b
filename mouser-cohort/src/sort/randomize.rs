//! Uniform random rebalancing
//!
//! Active subjects are shuffled, then dealt into groups starting from the
//! first group. A full group advances the cursor (wrapping) to the next
//! group with room.

use crate::store::AssignmentStore;
use mouser_common::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Pure placement step over an already shuffled subject list
///
/// `groups` are (group id, capacity) in ascending id order.
pub fn plan_cyclic(groups: &[(i64, i64)], subjects: &[i64]) -> Result<Vec<(i64, i64)>> {
    let mut occupancy = vec![0i64; groups.len()];
    let mut cursor = 0usize;
    let mut placements = Vec::with_capacity(subjects.len());

    for &subject_id in subjects {
        let slot = (0..groups.len())
            .map(|step| (cursor + step) % groups.len())
            .find(|&idx| occupancy[idx] < groups[idx].1)
            .ok_or_else(|| Error::CapacityExceeded {
                group_id: None,
                reason: format!("no group has room for subject {}", subject_id),
            })?;

        cursor = slot;
        occupancy[slot] += 1;
        placements.push((subject_id, groups[slot].0));
    }

    Ok(placements)
}

pub struct RandomizeEngine {
    store: Arc<AssignmentStore>,
}

impl RandomizeEngine {
    pub fn new(store: Arc<AssignmentStore>) -> Self {
        Self { store }
    }

    /// Randomize with an entropy-seeded generator
    pub async fn run(&self) -> Result<BTreeMap<i64, i64>> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(&mut rng).await
    }

    /// Randomize with a caller-supplied generator
    ///
    /// Fails with `Error::CapacityExceeded` before writing anything when the
    /// active subjects do not fit in the total capacity.
    pub async fn run_with_rng<R: Rng + Send>(&self, rng: &mut R) -> Result<BTreeMap<i64, i64>> {
        let mut txn = self.store.begin_write().await?;

        let mut groups: Vec<(i64, i64)> = txn
            .groups()
            .await?
            .into_iter()
            .map(|g| (g.group_id, g.cage_capacity))
            .collect();
        groups.sort_by_key(|(id, _)| *id);

        let mut subjects: Vec<i64> = txn
            .active_members()
            .await?
            .into_iter()
            .map(|(subject_id, _)| subject_id)
            .collect();

        let total_capacity: i64 = groups.iter().map(|(_, cap)| cap).sum();
        if subjects.len() as i64 > total_capacity {
            return Err(Error::CapacityExceeded {
                group_id: None,
                reason: format!(
                    "{} active subjects exceed total capacity {}",
                    subjects.len(),
                    total_capacity
                ),
            });
        }

        subjects.shuffle(rng);
        let placements = plan_cyclic(&groups, &subjects)?;

        for (subject_id, group_id) in &placements {
            txn.set_subject_group(*subject_id, *group_id).await?;
        }
        txn.recount_occupancy().await?;
        txn.commit().await?;

        info!(subjects = placements.len(), groups = groups.len(), "Randomization committed");
        Ok(placements.into_iter().collect())
    }
}
