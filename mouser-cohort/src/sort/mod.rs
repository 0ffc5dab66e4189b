//! Rebalancing engines

pub mod auto_sort;
pub mod randomize;

pub use auto_sort::{plan_auto_sort, AutoSortEngine, SortCandidate, SortOutcome, SortPlan};
pub use randomize::{plan_cyclic, RandomizeEngine};
