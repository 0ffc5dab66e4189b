//! # Mouser Common Library
//!
//! Shared code for the Mouser cohort engine and its front ends:
//! - Error type and `Result` alias
//! - Configuration loading and root folder resolution
//! - Experiment database schema (definitions, creation, verification)
//! - Notification events and the bounded notification queue

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{CohortEvent, ListenerState, NotificationKind, NotificationQueue, NotificationSink};
