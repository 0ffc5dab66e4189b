//! Store sharing per experiment file

use mouser_common::config::StoreConfig;
use mouser_common::Error;
use mouser_cohort::{StoreRegistry, StoreScope};
use tempfile::TempDir;

mod helpers;

#[tokio::test]
async fn test_same_path_shares_one_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trial.mouser");
    let registry = StoreRegistry::new(StoreConfig::default());

    let first = registry.acquire(StoreScope::File(path.clone())).await.unwrap();
    // Same file through a non-canonical path
    let second = registry
        .acquire(StoreScope::File(dir.path().join(".").join("trial.mouser")))
        .await
        .unwrap();

    assert!(first.same_store(&second));
    assert_eq!(registry.holders(&path).await, 2);
    assert_eq!(registry.open_files().await, 1);

    first.setup_groups(&helpers::group_names(2), 3).await.unwrap();
    assert_eq!(second.groups().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_last_release_closes_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trial.mouser");
    let registry = StoreRegistry::default();

    let first = registry.acquire(StoreScope::File(path.clone())).await.unwrap();
    let second = registry.acquire(StoreScope::File(path.clone())).await.unwrap();

    registry.release(&first).await;
    // Releasing the same handle again changes nothing
    registry.release(&first).await;
    assert!(first.is_released());
    assert_eq!(registry.holders(&path).await, 1);
    assert!(!second.is_closed());
    second.groups().await.unwrap();

    registry.release(&second).await;
    assert_eq!(registry.holders(&path).await, 0);
    assert_eq!(registry.open_files().await, 0);
    assert!(second.is_closed());
}

#[tokio::test]
async fn test_reacquire_after_close_sees_persisted_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trial.mouser");
    let registry = StoreRegistry::default();

    let handle = registry.acquire(StoreScope::File(path.clone())).await.unwrap();
    handle.setup_groups(&helpers::group_names(3), 2).await.unwrap();
    registry.release(&handle).await;

    let reopened = registry.acquire(StoreScope::File(path)).await.unwrap();
    assert!(!reopened.same_store(&handle));
    assert_eq!(reopened.groups().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_in_memory_stores_are_distinct() {
    let registry = StoreRegistry::default();

    let first = registry.acquire(StoreScope::InMemory).await.unwrap();
    let second = registry.acquire(StoreScope::InMemory).await.unwrap();
    assert!(!first.same_store(&second));

    first.setup_groups(&helpers::group_names(2), 2).await.unwrap();
    assert_eq!(first.groups().await.unwrap().len(), 2);
    assert!(second.groups().await.unwrap().is_empty());
    assert_eq!(registry.open_files().await, 0);

    registry.release(&first).await;
    assert!(first.is_closed());
    assert!(!second.is_closed());
}

#[tokio::test]
async fn test_schema_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trial.mouser");
    let registry = StoreRegistry::default();

    let handle = registry.acquire(StoreScope::File(path.clone())).await.unwrap();
    sqlx::query("ALTER TABLE cohort_groups ADD COLUMN color TEXT")
        .execute(handle.pool())
        .await
        .unwrap();
    registry.release(&handle).await;

    let result = registry.acquire(StoreScope::File(path.clone())).await;
    assert!(matches!(result, Err(Error::Schema(_))));
    assert_eq!(registry.open_files().await, 0);
    assert_eq!(registry.holders(&path).await, 0);
}
