//! 并发正确性测试
//!
//! 多个前台终端同时签到和叫号时，排队号连续且唯一，同一患者不会被叫两次，
//! 同一就诊最多只有一个活跃分配。

use chrono::{TimeZone, Utc};
use opd_core::{AssignmentStatus, CreateAssignmentRequest, ManualClock, OpdError, QueuePriority};
use opd_queue::{MemoryAssignmentStore, MemoryEncounterDirectory, QueueManager, QueueSettings};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

fn manager() -> Arc<QueueManager> {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    Arc::new(
        QueueManager::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(MemoryEncounterDirectory::permissive()),
            clock,
            // 诊室叫号和全局叫号同时竞争同一批记录，放宽重试上限
            QueueSettings {
                max_transition_attempts: 50,
                ..QueueSettings::default()
            },
        )
        .unwrap(),
    )
}

fn check_in(encounter_id: Uuid, room: Option<&str>, priority: QueuePriority) -> CreateAssignmentRequest {
    CreateAssignmentRequest {
        encounter_id,
        room_id: room.map(str::to_owned),
        priority: Some(priority),
        priority_reason: None,
        created_by: "front-desk".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_get_contiguous_numbers() {
    let manager = manager();
    let mut handles = Vec::new();

    for i in 0..50 {
        let manager = manager.clone();
        let room = if i % 2 == 0 { "R1" } else { "R2" };
        handles.push(tokio::spawn(async move {
            manager
                .create(check_in(Uuid::new_v4(), Some(room), QueuePriority::Routine))
                .await
                .unwrap()
        }));
    }

    let mut r1 = Vec::new();
    let mut r2 = Vec::new();
    for handle in handles {
        let a = handle.await.unwrap();
        match a.room_id.as_deref() {
            Some("R1") => r1.push(a.queue_number),
            _ => r2.push(a.queue_number),
        }
    }

    r1.sort_unstable();
    r2.sort_unstable();
    assert_eq!(r1, (1..=25).collect::<Vec<i32>>());
    assert_eq!(r2, (1..=25).collect::<Vec<i32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_for_one_encounter_yield_single_active() {
    let manager = manager();
    let encounter_id = Uuid::new_v4();
    let mut handles = Vec::new();

    for _ in 0..20 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .create(check_in(encounter_id, Some("R1"), QueuePriority::Routine))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(OpdError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(manager.list_waiting(Some("R1")).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_call_next_never_double_calls() {
    let manager = manager();
    let mut expected = HashSet::new();
    for i in 0..30 {
        let priority = if i % 5 == 0 { QueuePriority::Urgent } else { QueuePriority::Routine };
        let a = manager
            .create(check_in(Uuid::new_v4(), Some("R1"), priority))
            .await
            .unwrap();
        expected.insert(a.id);
    }

    // 诊室叫号和全局叫号是两个竞争域，混合调用
    let mut handles = Vec::new();
    for i in 0..40 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let room = if i % 3 == 0 { None } else { Some("R1") };
            manager.call_next(room, Some("dr-test")).await
        }));
    }

    let mut called = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(a) => {
                assert_eq!(a.status, AssignmentStatus::InProgress);
                assert!(called.insert(a.id), "assignment {} called twice", a.id);
            }
            Err(OpdError::QueueEmpty(_)) => empty += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(called, expected);
    assert_eq!(empty, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_expire_each_assignment_once() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let manager = Arc::new(
        QueueManager::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(MemoryEncounterDirectory::permissive()),
            clock.clone(),
            QueueSettings::default(),
        )
        .unwrap(),
    );
    for _ in 0..20 {
        manager
            .create(check_in(Uuid::new_v4(), Some("R1"), QueuePriority::Routine))
            .await
            .unwrap();
    }
    clock.advance(chrono::Duration::hours(25));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move { manager.run_auto_expire_sweep().await.unwrap() }));
    }

    let mut total = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.failures.is_empty());
        total += report.expired_count;
    }
    assert_eq!(total, 20);
}
