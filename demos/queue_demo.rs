//! 门诊排队演示程序
//!
//! 模拟一个上午的前台操作：签到、叫号、完成、取消、自动过期和看板统计

use chrono::{Duration, Utc};
use opd_core::{CreateAssignmentRequest, ManualClock, QueuePriority, RoomFilter};
use opd_queue::{
    ExpirySweeper, MemoryAssignmentStore, MemoryEncounterDirectory, QueueManager, QueueSettings,
    RoomStatsAggregator, TracingAuditSink,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let encounters = Arc::new(MemoryEncounterDirectory::new());
    let manager = Arc::new(QueueManager::new(
        Arc::new(MemoryAssignmentStore::new()),
        encounters.clone(),
        clock.clone(),
        QueueSettings::default(),
    )?);

    println!("🚀 门诊排队演示\n");

    // 1. 登记就诊
    let patients = [
        ("R1", QueuePriority::Routine, None),
        ("R1", QueuePriority::Routine, None),
        ("R1", QueuePriority::Urgent, Some("高热")),
        ("R2", QueuePriority::Routine, None),
        ("R1", QueuePriority::Stat, Some("胸痛")),
    ];

    let mut assignments = Vec::new();
    for (room, priority, reason) in patients {
        let encounter_id = Uuid::new_v4();
        encounters.register(encounter_id, Some(room.to_string())).await;

        let assignment = manager
            .create(CreateAssignmentRequest {
                encounter_id,
                room_id: None,
                priority: Some(priority),
                priority_reason: reason.map(str::to_owned),
                created_by: "front-desk".to_string(),
            })
            .await?;

        info!(
            "✅ 签到 {} 号 (诊室 {}, {}), 预计等待 {} 分钟",
            assignment.queue_number,
            room,
            priority,
            assignment.estimated_wait_time
        );
        assignments.push(assignment);
        clock.advance(Duration::minutes(3));
    }

    // 2. 重复签到被拒绝
    let duplicate = CreateAssignmentRequest {
        encounter_id: assignments[0].encounter_id,
        room_id: Some("R1".to_string()),
        priority: None,
        priority_reason: None,
        created_by: "front-desk".to_string(),
    };
    if let Err(e) = manager.create(duplicate).await {
        warn!("⚠️  重复签到: {} ({})", e, e.code());
    }

    // 3. 叫号
    println!("\n📢 诊室 R1 叫号:");
    for _ in 0..2 {
        let called = manager.call_next(Some("R1"), Some("dr-li")).await?;
        println!("   {} 号 ({})", called.queue_number, called.priority);
        clock.advance(Duration::minutes(12));
        manager.complete(called.id).await?;
    }

    let info = manager.get_estimated_wait_time(assignments[1].id).await?;
    println!("\n⏱️  等待时间: {}", serde_json::to_string_pretty(&info)?);

    // 4. 患者离开
    let cancelled = manager.cancel(assignments[1].id).await?;
    println!("\n🚪 {} 号取消排队 ({})", cancelled.queue_number, cancelled.status);

    // 5. 看板统计
    let stats = RoomStatsAggregator::new(manager.store().clone(), clock.clone(), 0)
        .stats_for_rooms(&[
            RoomFilter {
                room_id: "内科一诊".to_string(),
                service_room_ids: vec!["R1".to_string(), "R2".to_string()],
            },
            RoomFilter {
                room_id: "外科".to_string(),
                service_room_ids: vec![],
            },
        ])
        .await?;
    println!("\n📊 看板统计:");
    for (room, room_stats) in &stats {
        println!(
            "   {}: 等待 {}, 就诊中 {}",
            room, room_stats.max_waiting, room_stats.current_in_progress
        );
    }

    // 6. 一天后自动过期
    clock.advance(Duration::hours(24));
    let sweeper = ExpirySweeper::new(
        manager.clone(),
        Arc::new(TracingAuditSink),
        std::time::Duration::from_secs(3600),
    );
    let report = sweeper.run_once().await?;
    info!("🧹 自动过期 {} 条记录", report.expired_count);

    println!("\n{}", manager.metrics().render()?);
    Ok(())
}
