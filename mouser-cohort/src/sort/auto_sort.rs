//! Deterministic rebalancing by measurement
//!
//! Subjects with a fresh (unused) measurement are ordered by value and
//! dealt into groups from alternating ends: one pass over the groups takes
//! from the heaviest end, the next from the lightest, and so on. Subjects
//! without a fresh measurement keep their group and count against its
//! capacity first.

use crate::store::AssignmentStore;
use mouser_common::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// A subject eligible for sorting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortCandidate {
    pub subject_id: i64,
    pub measurement_id: i64,
    pub value: f64,
}

/// Output of [`plan_auto_sort`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortPlan {
    /// (subject, group, measurement consumed)
    pub placements: Vec<(i64, i64, i64)>,
    /// Candidates no pass could place
    pub unplaced: Vec<i64>,
}

/// Result of a committed auto-sort
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SortOutcome {
    /// Subject → group for every subject that was sorted
    pub placements: BTreeMap<i64, i64>,
    pub measurements_used: usize,
}

/// Pure placement step
///
/// `groups` are (group id, capacity); `base_occupancy` counts the members
/// that stay where they are.
pub fn plan_auto_sort(
    groups: &[(i64, i64)],
    base_occupancy: &HashMap<i64, i64>,
    mut candidates: Vec<SortCandidate>,
) -> SortPlan {
    candidates.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });

    let mut ordered_groups = groups.to_vec();
    ordered_groups.sort_by_key(|(id, _)| *id);

    let mut occupancy: HashMap<i64, i64> = ordered_groups
        .iter()
        .map(|(id, _)| (*id, base_occupancy.get(id).copied().unwrap_or(0)))
        .collect();

    let mut queue: VecDeque<SortCandidate> = candidates.into();
    let mut placements = Vec::with_capacity(queue.len());
    let mut take_high = true;

    while !queue.is_empty() {
        let mut placed_this_pass = 0;

        for (group_id, capacity) in &ordered_groups {
            let count = occupancy.entry(*group_id).or_insert(0);
            if *count >= *capacity {
                continue;
            }
            let next = if take_high {
                queue.pop_front()
            } else {
                queue.pop_back()
            };
            let Some(candidate) = next else { break };

            placements.push((candidate.subject_id, *group_id, candidate.measurement_id));
            *count += 1;
            placed_this_pass += 1;
        }

        if placed_this_pass == 0 {
            break;
        }
        take_high = !take_high;
    }

    SortPlan {
        placements,
        unplaced: queue.iter().map(|c| c.subject_id).collect(),
    }
}

pub struct AutoSortEngine {
    store: Arc<AssignmentStore>,
}

impl AutoSortEngine {
    pub fn new(store: Arc<AssignmentStore>) -> Self {
        Self { store }
    }

    /// Rebalance in one transaction
    ///
    /// Placed subjects, their consumed measurements and the recomputed
    /// counters are committed together. If any active subject was left
    /// where it was, the commit still happens and `Error::IncompleteSort`
    /// lists those subjects.
    pub async fn run(&self) -> Result<SortOutcome> {
        let mut txn = self.store.begin_write().await?;

        let groups: Vec<(i64, i64)> = txn
            .groups()
            .await?
            .into_iter()
            .map(|g| (g.group_id, g.cage_capacity))
            .collect();
        let members = txn.active_members().await?;
        let candidates: Vec<SortCandidate> = txn
            .latest_unused_measurements()
            .await?
            .into_iter()
            .map(|(subject_id, measurement_id, value)| SortCandidate {
                subject_id,
                measurement_id,
                value,
            })
            .collect();

        let fresh: BTreeSet<i64> = candidates.iter().map(|c| c.subject_id).collect();
        let mut base_occupancy: HashMap<i64, i64> = HashMap::new();
        let mut skipped: Vec<i64> = Vec::new();
        for (subject_id, group_id) in &members {
            if !fresh.contains(subject_id) {
                *base_occupancy.entry(*group_id).or_insert(0) += 1;
                skipped.push(*subject_id);
            }
        }

        let plan = plan_auto_sort(&groups, &base_occupancy, candidates);

        for (subject_id, group_id, measurement_id) in &plan.placements {
            txn.set_subject_group(*subject_id, *group_id).await?;
            txn.mark_measurement_used(*measurement_id).await?;
        }
        txn.recount_occupancy().await?;
        txn.commit().await?;

        skipped.extend(plan.unplaced.iter().copied());
        skipped.sort_unstable();

        let outcome = SortOutcome {
            placements: plan.placements.iter().map(|(s, g, _)| (*s, *g)).collect(),
            measurements_used: plan.placements.len(),
        };

        info!(
            sorted = outcome.placements.len(),
            skipped = skipped.len(),
            "Auto-sort committed"
        );

        if skipped.is_empty() {
            Ok(outcome)
        } else {
            warn!(?skipped, "Auto-sort left subjects in their prior group");
            Err(Error::IncompleteSort { skipped })
        }
    }
}
