//! 诊室队列统计
//!
//! 只读组件，给看板提供各诊室的等待人数和就诊中人数。
//! 一次调用内所有服务诊室合并成一次存储查询，结果在内存中分组计数。

use opd_core::utils::calendar_day;
use opd_core::{AssignmentStatus, ClockSource, Result, RoomFilter, RoomStats};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::store::AssignmentStore;

/// 诊室统计聚合器
pub struct RoomStatsAggregator {
    store: Arc<dyn AssignmentStore>,
    clock: Arc<dyn ClockSource>,
    utc_offset_minutes: i32,
}

impl RoomStatsAggregator {
    pub fn new(store: Arc<dyn AssignmentStore>, clock: Arc<dyn ClockSource>, utc_offset_minutes: i32) -> Self {
        Self {
            store,
            clock,
            utc_offset_minutes,
        }
    }

    /// 计算各诊室当天的队列统计
    ///
    /// 没有服务诊室的条目直接返回零值，不访问存储。
    pub async fn stats_for_rooms(&self, filters: &[RoomFilter]) -> Result<HashMap<String, RoomStats>> {
        let mut result = HashMap::with_capacity(filters.len());

        let service_rooms: BTreeSet<&str> = filters
            .iter()
            .flat_map(|filter| filter.service_room_ids.iter().map(String::as_str))
            .collect();

        // 每个服务诊室的（等待, 就诊中）计数
        let mut per_room: HashMap<String, RoomStats> = HashMap::new();
        if !service_rooms.is_empty() {
            let day = calendar_day(self.clock.now(), self.utc_offset_minutes);
            let room_ids: Vec<String> = service_rooms.iter().map(|room| room.to_string()).collect();
            let assignments = self.store.find_by_rooms_on_day(&room_ids, day).await?;

            for assignment in assignments.iter().filter(|a| !a.is_deleted) {
                let Some(room) = assignment.room_id.as_deref() else {
                    continue;
                };
                let stats = per_room.entry(room.to_string()).or_default();
                match assignment.status {
                    AssignmentStatus::Waiting => stats.max_waiting += 1,
                    AssignmentStatus::InProgress => stats.current_in_progress += 1,
                    _ => {}
                }
            }
            debug!(
                "Aggregated {} assignments across {} service rooms for {}",
                assignments.len(),
                room_ids.len(),
                day
            );
        }

        for filter in filters {
            // 同一服务诊室在一个条目里重复出现只计一次
            let own_rooms: BTreeSet<&str> = filter.service_room_ids.iter().map(String::as_str).collect();
            let stats = own_rooms
                .into_iter()
                .filter_map(|room| per_room.get(room))
                .fold(RoomStats::default(), |acc, room| RoomStats {
                    max_waiting: acc.max_waiting + room.max_waiting,
                    current_in_progress: acc.current_in_progress + room.current_in_progress,
                });
            result.insert(filter.room_id.clone(), stats);
        }

        Ok(result)
    }
}

impl std::fmt::Debug for RoomStatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomStatsAggregator")
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAssignmentStore;
    use crate::store::AssignmentUpdate;
    use chrono::{Duration, TimeZone, Utc};
    use opd_core::{ManualClock, QueueAssignment, QueuePriority};
    use uuid::Uuid;

    async fn seed(store: &MemoryAssignmentStore, room: &str, number: i32, at: chrono::DateTime<Utc>) -> QueueAssignment {
        store
            .insert(QueueAssignment {
                id: Uuid::new_v4(),
                encounter_id: Uuid::new_v4(),
                room_id: Some(room.to_string()),
                queue_number: number,
                queue_day: at.date_naive(),
                assignment_date: at,
                assignment_expires_date: at + Duration::hours(24),
                status: AssignmentStatus::Waiting,
                priority: QueuePriority::Routine,
                priority_reason: None,
                estimated_wait_time: 5,
                called_at: None,
                called_by: None,
                created_by: "desk-1".to_string(),
                is_deleted: false,
                created_at: at,
                updated_at: at,
            })
            .await
            .unwrap()
    }

    fn filter(room: &str, services: &[&str]) -> RoomFilter {
        RoomFilter {
            room_id: room.to_string(),
            service_room_ids: services.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_counts_today_per_service_room() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let store = Arc::new(MemoryAssignmentStore::new());
        seed(&store, "S1", 1, now).await;
        let called = seed(&store, "S1", 2, now).await;
        seed(&store, "S2", 1, now).await;
        seed(&store, "S1", 1, now - Duration::days(1)).await;

        let update = AssignmentUpdate::transition(AssignmentStatus::Waiting, AssignmentStatus::InProgress, now);
        store.update(called.id, update).await.unwrap();

        let aggregator = RoomStatsAggregator::new(store, Arc::new(ManualClock::new(now)), 0);
        let stats = aggregator
            .stats_for_rooms(&[filter("A", &["S1"]), filter("B", &["S1", "S2"]), filter("C", &[])])
            .await
            .unwrap();

        assert_eq!(stats["A"], RoomStats { max_waiting: 1, current_in_progress: 1 });
        assert_eq!(stats["B"], RoomStats { max_waiting: 2, current_in_progress: 1 });
        assert_eq!(stats["C"], RoomStats::default());
    }

    #[tokio::test]
    async fn test_empty_input_gives_empty_map() {
        let aggregator = RoomStatsAggregator::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            0,
        );
        assert!(aggregator.stats_for_rooms(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_service_room_counted_once() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let store = Arc::new(MemoryAssignmentStore::new());
        seed(&store, "S1", 1, now).await;

        let aggregator = RoomStatsAggregator::new(store, Arc::new(ManualClock::new(now)), 0);
        let stats = aggregator.stats_for_rooms(&[filter("A", &["S1", "S1"])]).await.unwrap();
        assert_eq!(stats["A"].max_waiting, 1);
    }
}
