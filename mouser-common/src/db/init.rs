//! Experiment database initialization
//!
//! A fresh file gets the full schema; an existing file is verified and
//! rejected with [`Error::Schema`] on any mismatch. There is no automatic
//! migration.

use crate::config::StoreConfig;
use crate::db::schema::{SchemaIntrospector, SchemaVerifier, TableSchema};
use crate::db::tables::{AnimalsTable, ExperimentTable, GroupsTable, MeasurementsTable};
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Schema version recorded in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Open (or create) an experiment file
pub async fn init_database(db_path: &Path, config: &StoreConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL allows concurrent readers alongside the single writer
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new experiment file: {}", db_path.display());
    } else {
        info!("Opened existing experiment file: {}", db_path.display());
    }

    if let Err(e) = prepare_schema(&pool).await {
        pool.close().await;
        return Err(e);
    }

    Ok(pool)
}

/// Open a private in-memory experiment database
///
/// The pool holds a single connection that never expires; an in-memory
/// SQLite database lives only as long as its connection.
pub async fn init_in_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    prepare_schema(&pool).await?;
    debug!("Initialized in-memory experiment database");

    Ok(pool)
}

/// Create the schema in an empty database, verify it otherwise
pub async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    let tables = SchemaIntrospector::user_tables(pool).await?;

    if tables.is_empty() {
        return create_schema(pool).await;
    }

    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if version != SCHEMA_VERSION {
        return Err(Error::Schema(format!(
            "schema version {} found, expected {}",
            version, SCHEMA_VERSION
        )));
    }

    SchemaVerifier::verify_table::<ExperimentTable>(pool).await?;
    SchemaVerifier::verify_table::<GroupsTable>(pool).await?;
    SchemaVerifier::verify_table::<AnimalsTable>(pool).await?;
    SchemaVerifier::verify_table::<MeasurementsTable>(pool).await?;

    Ok(())
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in [
        ExperimentTable::create_statement(),
        GroupsTable::create_statement(),
        AnimalsTable::create_statement(),
        MeasurementsTable::create_statement(),
    ] {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }

    for index in AnimalsTable::indexes()
        .into_iter()
        .chain(MeasurementsTable::indexes())
    {
        sqlx::query(index).execute(&mut *tx).await?;
    }

    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("Created experiment schema (version {})", SCHEMA_VERSION);
    Ok(())
}
