//! 分配记录存储接口
//!
//! 持久化技术由外部决定，调度核心只依赖这里的查询约定。
//! 所有查询都排除已软删除的记录。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use opd_core::{AssignmentStatus, QueueAssignment, Result};
use uuid::Uuid;

/// 分配记录的部分更新
///
/// `expected_status` 不为空时是条件写：只有当前状态与之相等才会生效，
/// 否则 `update` 返回 `None`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentUpdate {
    pub expected_status: Option<AssignmentStatus>,
    pub status: Option<AssignmentStatus>,
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<String>,
    pub is_deleted: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssignmentUpdate {
    /// 从 `from` 到 `to` 的条件状态转换
    pub fn transition(from: AssignmentStatus, to: AssignmentStatus, at: DateTime<Utc>) -> Self {
        Self {
            expected_status: Some(from),
            status: Some(to),
            updated_at: Some(at),
            ..Self::default()
        }
    }

    /// 软删除
    pub fn soft_delete(at: DateTime<Utc>) -> Self {
        Self {
            is_deleted: Some(true),
            updated_at: Some(at),
            ..Self::default()
        }
    }

    /// 附加叫号信息
    pub fn called(mut self, called_by: Option<String>, at: DateTime<Utc>) -> Self {
        self.called_at = Some(at);
        self.called_by = called_by;
        self
    }

    /// 条件是否满足
    pub fn matches(&self, current: &QueueAssignment) -> bool {
        !current.is_deleted
            && self
                .expected_status
                .map_or(true, |expected| expected == current.status)
    }

    /// 应用到记录上
    pub fn apply(&self, target: &mut QueueAssignment) {
        if let Some(status) = self.status {
            target.status = status;
        }
        if let Some(called_at) = self.called_at {
            target.called_at = Some(called_at);
        }
        if let Some(called_by) = &self.called_by {
            target.called_by = Some(called_by.clone());
        }
        if let Some(is_deleted) = self.is_deleted {
            target.is_deleted = is_deleted;
        }
        if let Some(updated_at) = self.updated_at {
            target.updated_at = updated_at;
        }
    }
}

/// 分配记录存储
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// 插入新记录，违反唯一性约束时返回 `Conflict`
    async fn insert(&self, assignment: QueueAssignment) -> Result<QueueAssignment>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueAssignment>>;

    /// 某次就诊的活跃分配（WAITING / IN_PROGRESS）
    async fn find_active_by_encounter(&self, encounter_id: Uuid) -> Result<Option<QueueAssignment>>;

    /// 等待中的分配，按优先级降序、签到时间升序排列；`room_id` 为空表示全部诊室
    async fn find_waiting(&self, room_id: Option<&str>) -> Result<Vec<QueueAssignment>>;

    /// 等待人数；`before` 不为空时只统计更早签到的
    async fn count_waiting(&self, room_id: Option<&str>, before: Option<DateTime<Utc>>) -> Result<usize>;

    /// WAITING 且有效期早于 `now` 的分配
    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<QueueAssignment>>;

    /// 最近完成的分配，按更新时间倒序
    async fn find_recent_completed(&self, limit: usize) -> Result<Vec<QueueAssignment>>;

    /// 指定诊室集合在某天的全部分配
    async fn find_by_rooms_on_day(&self, room_ids: &[String], day: NaiveDate) -> Result<Vec<QueueAssignment>>;

    /// 部分更新，条件不满足或记录不存在时返回 `None`
    async fn update(&self, id: Uuid, update: AssignmentUpdate) -> Result<Option<QueueAssignment>>;

    /// 某诊室某天已分配的最大号码
    async fn max_queue_number(&self, room_id: Option<&str>, day: NaiveDate) -> Result<Option<i32>>;
}
