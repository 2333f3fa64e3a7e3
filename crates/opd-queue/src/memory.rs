//! 内存存储
//!
//! `AssignmentStore` 的进程内实现，用于单机部署和测试。
//! 唯一性约束与数据库中的唯一索引保持一致。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use opd_core::{AssignmentStatus, OpdError, QueueAssignment, Result};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{AssignmentStore, AssignmentUpdate};

/// 内存分配存储
#[derive(Debug, Default)]
pub struct MemoryAssignmentStore {
    assignments: RwLock<HashMap<Uuid, QueueAssignment>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录总数（包含已删除和终态记录）
    pub async fn len(&self) -> usize {
        self.assignments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assignments.read().await.is_empty()
    }

    /// 按 id 读取原始记录，不过滤软删除
    pub async fn raw(&self, id: Uuid) -> Option<QueueAssignment> {
        self.assignments.read().await.get(&id).cloned()
    }

    fn in_room(assignment: &QueueAssignment, room_id: Option<&str>) -> bool {
        room_id.map_or(true, |room| assignment.room_id.as_deref() == Some(room))
    }

    fn is_waiting(assignment: &QueueAssignment) -> bool {
        !assignment.is_deleted && assignment.status == AssignmentStatus::Waiting
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn insert(&self, assignment: QueueAssignment) -> Result<QueueAssignment> {
        let mut assignments = self.assignments.write().await;

        if assignments.contains_key(&assignment.id) {
            return Err(OpdError::Conflict(format!("assignment {} already exists", assignment.id)));
        }

        for existing in assignments.values().filter(|a| !a.is_deleted) {
            if assignment.is_active() && existing.is_active() && existing.encounter_id == assignment.encounter_id {
                return Err(OpdError::Conflict(format!(
                    "encounter {} already has active assignment {}",
                    assignment.encounter_id, existing.id
                )));
            }
            if existing.room_id == assignment.room_id
                && existing.queue_day == assignment.queue_day
                && existing.queue_number == assignment.queue_number
            {
                return Err(OpdError::Conflict(format!(
                    "queue number {} already taken for room {:?} on {}",
                    assignment.queue_number, assignment.room_id, assignment.queue_day
                )));
            }
        }

        assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(&id).filter(|a| !a.is_deleted).cloned())
    }

    async fn find_active_by_encounter(&self, encounter_id: Uuid) -> Result<Option<QueueAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .find(|a| a.encounter_id == encounter_id && a.is_active())
            .cloned())
    }

    async fn find_waiting(&self, room_id: Option<&str>) -> Result<Vec<QueueAssignment>> {
        let assignments = self.assignments.read().await;
        let mut waiting: Vec<QueueAssignment> = assignments
            .values()
            .filter(|a| Self::is_waiting(a) && Self::in_room(a, room_id))
            .cloned()
            .collect();

        // 优先级高者在前，同优先级先到先服务
        waiting.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.assignment_date.cmp(&b.assignment_date))
                .then_with(|| a.queue_number.cmp(&b.queue_number))
        });

        Ok(waiting)
    }

    async fn count_waiting(&self, room_id: Option<&str>, before: Option<DateTime<Utc>>) -> Result<usize> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| Self::is_waiting(a) && Self::in_room(a, room_id))
            .filter(|a| before.map_or(true, |cutoff| a.assignment_date < cutoff))
            .count())
    }

    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<QueueAssignment>> {
        let assignments = self.assignments.read().await;
        let mut expirable: Vec<QueueAssignment> = assignments
            .values()
            .filter(|a| Self::is_waiting(a) && a.assignment_expires_date < now)
            .cloned()
            .collect();
        expirable.sort_by_key(|a| a.assignment_expires_date);
        Ok(expirable)
    }

    async fn find_recent_completed(&self, limit: usize) -> Result<Vec<QueueAssignment>> {
        let assignments = self.assignments.read().await;
        let mut completed: Vec<QueueAssignment> = assignments
            .values()
            .filter(|a| !a.is_deleted && a.status == AssignmentStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        completed.truncate(limit);
        Ok(completed)
    }

    async fn find_by_rooms_on_day(&self, room_ids: &[String], day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let rooms: HashSet<&str> = room_ids.iter().map(String::as_str).collect();
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| !a.is_deleted && a.queue_day == day)
            .filter(|a| a.room_id.as_deref().map_or(false, |room| rooms.contains(room)))
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, update: AssignmentUpdate) -> Result<Option<QueueAssignment>> {
        let mut assignments = self.assignments.write().await;
        match assignments.get_mut(&id) {
            Some(assignment) if update.matches(assignment) => {
                update.apply(assignment);
                Ok(Some(assignment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn max_queue_number(&self, room_id: Option<&str>, day: NaiveDate) -> Result<Option<i32>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| !a.is_deleted && a.queue_day == day && a.room_id.as_deref() == room_id)
            .map(|a| a.queue_number)
            .max())
    }
}
