//! Experiment database schema and initialization

pub mod init;
pub mod schema;
pub mod tables;

pub use init::*;
pub use schema::*;
pub use tables::*;
