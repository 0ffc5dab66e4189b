//! Capacity planner and store mutations

use chrono::Utc;
use mouser_common::Error;
use std::collections::BTreeMap;
use std::sync::Arc;

mod helpers;
use helpers::{assert_capacity_invariants, fixture, members_by_group};

#[tokio::test]
async fn test_subjects_fill_groups_in_order() {
    let f = fixture(3, 2, 6).await;

    for _ in 0..5 {
        f.service.add_subject(None, "").await.unwrap();
    }

    let groups = members_by_group(&f.service.get_assignments().await.unwrap());
    assert_eq!(groups[&1], vec![1, 2]);
    assert_eq!(groups[&2], vec![3, 4]);
    assert_eq!(groups[&3], vec![5]);
    assert_eq!(f.service.planner().find_next_available_group().await.unwrap(), Some(3));
    assert_eq!(f.service.planner().occupancy(2).await.unwrap(), 2);
    assert_capacity_invariants(&f.service).await;
}

#[tokio::test]
async fn test_assign_changes_only_target_subject() {
    let f = fixture(2, 3, 4).await;
    for _ in 0..4 {
        f.service.add_subject(None, "").await.unwrap();
    }
    let before = f.service.get_assignments().await.unwrap();

    f.service.assign(1, 2).await.unwrap();

    let after = f.service.get_assignments().await.unwrap();
    let mut expected: BTreeMap<i64, i64> = before.clone();
    expected.insert(1, 2);
    assert_eq!(after, expected);
    assert_eq!(f.service.planner().occupancy(1).await.unwrap(), 2);
    assert_eq!(f.service.planner().occupancy(2).await.unwrap(), 2);
    assert_capacity_invariants(&f.service).await;
}

#[tokio::test]
async fn test_assign_into_full_group_rejected() {
    let f = fixture(2, 2, 4).await;
    for _ in 0..3 {
        f.service.add_subject(None, "").await.unwrap();
    }
    // Group 1 holds 1 and 2, group 2 holds 3
    let before = f.service.get_assignments().await.unwrap();

    let result = f.service.assign(3, 1).await;
    assert!(matches!(
        result,
        Err(Error::CapacityExceeded {
            group_id: Some(1),
            ..
        })
    ));
    assert_eq!(f.service.get_assignments().await.unwrap(), before);

    // Same group is a no-op even when full
    f.service.assign(1, 1).await.unwrap();
    assert_eq!(f.service.get_assignments().await.unwrap(), before);
    assert_capacity_invariants(&f.service).await;
}

#[tokio::test]
async fn test_assign_unknown_targets() {
    let f = fixture(1, 2, 2).await;
    f.service.add_subject(None, "").await.unwrap();

    assert!(matches!(f.service.assign(99, 1).await, Err(Error::NotFound(_))));
    assert!(matches!(f.service.assign(1, 99).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_no_room_anywhere() {
    let f = fixture(2, 1, 2).await;
    f.service.add_subject(None, "").await.unwrap();
    f.service.add_subject(None, "").await.unwrap();

    let result = f.service.add_subject(Some("A1"), "").await;
    assert!(matches!(
        result,
        Err(Error::CapacityExceeded { group_id: None, .. })
    ));
    assert_eq!(f.service.subjects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_identifier_rejected() {
    let f = fixture(2, 2, 4).await;
    f.service.add_subject(Some("985112"), "").await.unwrap();

    let result = f.service.add_subject(Some(" 985112\r\n"), "").await;
    assert!(matches!(result, Err(Error::DuplicateIdentifier(ref rfid)) if rfid == "985112"));
    assert_eq!(f.service.subjects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_gap_fill_reuses_removed_id() {
    let f = fixture(2, 3, 6).await;
    for _ in 0..4 {
        f.service.add_subject(None, "").await.unwrap();
    }

    f.service.remove_subject(2).await.unwrap();
    assert_eq!(f.service.add_subject(None, "").await.unwrap(), 2);
    assert_eq!(f.service.add_subject(None, "").await.unwrap(), 5);
    assert_capacity_invariants(&f.service).await;
}

#[tokio::test]
async fn test_deactivated_id_stays_reserved() {
    let f = fixture(2, 2, 4).await;
    for _ in 0..3 {
        f.service.add_subject(None, "").await.unwrap();
    }

    f.service.deactivate_subject(2).await.unwrap();
    f.service.deactivate_subject(2).await.unwrap();

    assert_eq!(f.service.planner().occupancy(1).await.unwrap(), 1);
    assert!(!f.service.get_assignments().await.unwrap().contains_key(&2));
    assert_eq!(f.service.add_subject(None, "").await.unwrap(), 4);
    assert_capacity_invariants(&f.service).await;
}

#[tokio::test]
async fn test_deactivation_releases_identifier() {
    let f = fixture(2, 2, 4).await;
    let first = f.service.add_subject(Some("A1"), "").await.unwrap();

    f.service.deactivate_subject(first).await.unwrap();
    let second = f.service.add_subject(Some("A1"), "").await.unwrap();

    assert_ne!(first, second);
    let store = f.service.store();
    assert_eq!(store.active_subject_by_rfid("A1").await.unwrap().unwrap().animal_id, second);
}

#[tokio::test]
async fn test_change_identifier() {
    let f = fixture(2, 2, 4).await;
    let a = f.service.add_subject(Some("A1"), "").await.unwrap();
    let b = f.service.add_subject(Some("B1"), "").await.unwrap();

    assert!(matches!(
        f.service.change_identifier(b, Some("A1")).await,
        Err(Error::DuplicateIdentifier(_))
    ));
    assert!(matches!(
        f.service.change_identifier(b, Some("\r\n")).await,
        Err(Error::InvalidInput(_))
    ));

    // Re-setting its own identifier is fine
    f.service.change_identifier(a, Some("A1")).await.unwrap();
    f.service.change_identifier(b, Some(" C1 ")).await.unwrap();
    assert_eq!(f.service.store().subject(b).await.unwrap().rfid.as_deref(), Some("C1"));

    f.service.change_identifier(b, None).await.unwrap();
    assert_eq!(f.service.store().subject(b).await.unwrap().rfid, None);
}

#[tokio::test]
async fn test_remove_deletes_measurements() {
    let f = fixture(1, 3, 3).await;
    let id = f.service.add_subject(None, "").await.unwrap();
    f.service.add_measurement(id, Utc::now(), 21.5).await.unwrap();
    assert_eq!(f.service.store().measurements(id).await.unwrap().len(), 1);

    f.service.remove_subject(id).await.unwrap();
    assert!(f.service.store().measurements(id).await.unwrap().is_empty());
    assert!(matches!(f.service.store().subject(id).await, Err(Error::NotFound(_))));
    assert_eq!(f.service.planner().occupancy(1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_placements_never_overfill() {
    let f = fixture(3, 4, 0).await;
    let service = Arc::new(f.service);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let tag = format!("TAG{}", i);
            service.add_subject(Some(tag.as_str()), "").await
        }));
    }

    let mut placed = 0;
    let mut full = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => placed += 1,
            Err(Error::CapacityExceeded { .. }) => full += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(placed, 12);
    assert_eq!(full, 8);
    assert_capacity_invariants(&service).await;

    let ids: Vec<i64> = service.subjects().await.unwrap().iter().map(|s| s.animal_id).collect();
    assert_eq!(ids, (1..=12).collect::<Vec<i64>>());
}
