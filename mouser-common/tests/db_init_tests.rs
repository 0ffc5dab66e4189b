//! Experiment database creation and schema verification

use mouser_common::config::StoreConfig;
use mouser_common::db::{experiment_table_names, init_database, init_in_memory_database};
use mouser_common::Error;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("trial.mouser");

    let pool = init_database(&db_path, &StoreConfig::default()).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");

    let pool = pool.unwrap();
    for table in experiment_table_names() {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} was not created", table);
    }
    pool.close().await;
}

#[tokio::test]
async fn test_database_reopens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("trial.mouser");

    let first = init_database(&db_path, &StoreConfig::default()).await.unwrap();
    first.close().await;

    let second = init_database(&db_path, &StoreConfig::default()).await;
    assert!(second.is_ok(), "Failed to reopen: {:?}", second.err());
    second.unwrap().close().await;
}

#[tokio::test]
async fn test_foreign_file_rejected_with_schema_error() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("foreign.db");

    // A SQLite file that belongs to some other application
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let other = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query("CREATE TABLE songs (guid TEXT PRIMARY KEY)")
        .execute(&other)
        .await
        .unwrap();
    other.close().await;

    let result = init_database(&db_path, &StoreConfig::default()).await;
    assert!(matches!(result, Err(Error::Schema(_))), "got {:?}", result.err());
}

#[tokio::test]
async fn test_altered_table_rejected_with_schema_error() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("altered.mouser");

    let pool = init_database(&db_path, &StoreConfig::default()).await.unwrap();
    sqlx::query("ALTER TABLE animals ADD COLUMN weight INTEGER")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    match init_database(&db_path, &StoreConfig::default()).await {
        Err(Error::Schema(message)) => assert!(message.contains("animals.weight")),
        other => panic!("expected schema error, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_in_memory_databases_are_independent() {
    let a = init_in_memory_database().await.unwrap();
    let b = init_in_memory_database().await.unwrap();

    sqlx::query("INSERT INTO cohort_groups (group_id, name, cage_capacity) VALUES (1, 'A', 2)")
        .execute(&a)
        .await
        .unwrap();

    let count_b: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cohort_groups")
        .fetch_one(&b)
        .await
        .unwrap();
    assert_eq!(count_b, 0);
}

#[tokio::test]
async fn test_capacity_check_constraint() {
    let pool = init_in_memory_database().await.unwrap();
    sqlx::query("INSERT INTO cohort_groups (group_id, name, cage_capacity) VALUES (1, 'A', 1)")
        .execute(&pool)
        .await
        .unwrap();

    let over = sqlx::query("UPDATE cohort_groups SET num_animals = 2 WHERE group_id = 1")
        .execute(&pool)
        .await;
    assert!(over.is_err(), "occupancy above capacity must be rejected");
}
