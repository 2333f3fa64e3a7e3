//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::OpdError;

/// 分诊队列分配记录
///
/// 每个就诊（encounter）在某个诊室队列中的一次排队。
/// 只能由 `QueueManager` 写入，其余组件只读。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueAssignment {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub room_id: Option<String>,         // 诊室，未匹配医生前可以为空
    pub queue_number: i32,               // 同一诊室同一天内唯一
    pub queue_day: NaiveDate,            // 排号所属的自然日
    pub assignment_date: DateTime<Utc>,  // 签到时间
    pub assignment_expires_date: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub priority: QueuePriority,
    pub priority_reason: Option<String>,
    pub estimated_wait_time: i32,        // 分钟，创建时计算一次
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<String>,
    pub created_by: String,              // 前台操作员
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueAssignment {
    /// 是否处于活跃状态（等待中或就诊中）
    pub fn is_active(&self) -> bool {
        !self.is_deleted && self.status.is_active()
    }
}

/// 分配状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Waiting,    // 等待叫号
    InProgress, // 就诊中
    Completed,  // 已完成
    Expired,    // 已过期
    Cancelled,  // 已取消
    Skipped,    // 已跳过
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Waiting => "WAITING",
            AssignmentStatus::InProgress => "IN_PROGRESS",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Expired => "EXPIRED",
            AssignmentStatus::Cancelled => "CANCELLED",
            AssignmentStatus::Skipped => "SKIPPED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AssignmentStatus::Waiting | AssignmentStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = OpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(AssignmentStatus::Waiting),
            "IN_PROGRESS" => Ok(AssignmentStatus::InProgress),
            "COMPLETED" => Ok(AssignmentStatus::Completed),
            "EXPIRED" => Ok(AssignmentStatus::Expired),
            "CANCELLED" => Ok(AssignmentStatus::Cancelled),
            "SKIPPED" => Ok(AssignmentStatus::Skipped),
            other => Err(OpdError::Validation(format!("unknown assignment status: {}", other))),
        }
    }
}

/// 分诊优先级
///
/// 排序上 `Stat > Urgent > Routine`，叫号时优先级高者先出队。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueuePriority {
    #[default]
    Routine, // 常规
    Urgent,  // 紧急
    Stat,    // 危急，立即处理
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePriority::Routine => "ROUTINE",
            QueuePriority::Urgent => "URGENT",
            QueuePriority::Stat => "STAT",
        }
    }
}

impl fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueuePriority {
    type Err = OpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROUTINE" => Ok(QueuePriority::Routine),
            "URGENT" => Ok(QueuePriority::Urgent),
            "STAT" => Ok(QueuePriority::Stat),
            other => Err(OpdError::Validation(format!("unknown queue priority: {}", other))),
        }
    }
}

/// 创建分配的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssignmentRequest {
    pub encounter_id: Uuid,
    pub room_id: Option<String>,
    pub priority: Option<QueuePriority>,
    pub priority_reason: Option<String>,
    pub created_by: String,
}

/// 诊室统计过滤条件：一个诊室对应若干服务诊室
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomFilter {
    pub room_id: String,
    #[serde(default)]
    pub service_room_ids: Vec<String>,
}

/// 诊室实时队列统计
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoomStats {
    pub max_waiting: usize,
    pub current_in_progress: usize,
}

/// 等待时间查询结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitTimeInfo {
    pub assignment_id: Uuid,
    pub position: usize,          // 当前排在第几位（从1开始）
    pub estimated_minutes: i32,   // 创建时的预估值
    pub average_minutes: f64,     // 最近完成记录的平均等待
}

/// 自动过期清理结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SweepReport {
    pub expired_count: usize,
    pub expired: Vec<QueueAssignment>,
    pub failures: Vec<SweepFailure>,
}

/// 单条记录过期失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFailure {
    pub assignment_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(QueuePriority::Stat > QueuePriority::Urgent);
        assert!(QueuePriority::Urgent > QueuePriority::Routine);
        assert_eq!(QueuePriority::default(), QueuePriority::Routine);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            AssignmentStatus::Waiting,
            AssignmentStatus::InProgress,
            AssignmentStatus::Completed,
            AssignmentStatus::Expired,
            AssignmentStatus::Cancelled,
            AssignmentStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<AssignmentStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&AssignmentStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let priority: QueuePriority = serde_json::from_str("\"STAT\"").unwrap();
        assert_eq!(priority, QueuePriority::Stat);
    }

    #[test]
    fn test_room_filter_defaults_to_no_service_rooms() {
        let filter: RoomFilter = serde_json::from_str(r#"{"room_id": "R1"}"#).unwrap();
        assert!(filter.service_room_ids.is_empty());
    }
}
