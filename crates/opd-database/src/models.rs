//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use opd_core::{OpdError, QueueAssignment};
use sqlx::FromRow;
use uuid::Uuid;

/// 数据库排队分配表
#[derive(Debug, Clone, FromRow)]
pub struct DbQueueAssignment {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub room_id: Option<String>,
    pub queue_number: i32,
    pub queue_day: NaiveDate,
    pub assignment_date: DateTime<Utc>,
    pub assignment_expires_date: DateTime<Utc>,
    pub status: String,   // 存储为字符串，转换为AssignmentStatus枚举
    pub priority: String, // 存储为字符串，转换为QueuePriority枚举
    pub priority_reason: Option<String>,
    pub estimated_wait_time: i32,
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<String>,
    pub created_by: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbQueueAssignment> for QueueAssignment {
    type Error = OpdError;

    fn try_from(row: DbQueueAssignment) -> Result<Self, Self::Error> {
        Ok(QueueAssignment {
            id: row.id,
            encounter_id: row.encounter_id,
            room_id: row.room_id,
            queue_number: row.queue_number,
            queue_day: row.queue_day,
            assignment_date: row.assignment_date,
            assignment_expires_date: row.assignment_expires_date,
            status: row.status.parse()?,
            priority: row.priority.parse()?,
            priority_reason: row.priority_reason,
            estimated_wait_time: row.estimated_wait_time,
            called_at: row.called_at,
            called_by: row.called_by,
            created_by: row.created_by,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use opd_core::{AssignmentStatus, QueuePriority};

    fn row(status: &str, priority: &str) -> DbQueueAssignment {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        DbQueueAssignment {
            id: Uuid::new_v4(),
            encounter_id: Uuid::new_v4(),
            room_id: Some("R1".to_string()),
            queue_number: 3,
            queue_day: at.date_naive(),
            assignment_date: at,
            assignment_expires_date: at + chrono::Duration::hours(24),
            status: status.to_string(),
            priority: priority.to_string(),
            priority_reason: Some("chest pain".to_string()),
            estimated_wait_time: 5,
            called_at: None,
            called_by: None,
            created_by: "desk-1".to_string(),
            is_deleted: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_row_conversion() {
        let db = row("IN_PROGRESS", "STAT");
        let id = db.id;
        let assignment = QueueAssignment::try_from(db).unwrap();

        assert_eq!(assignment.id, id);
        assert_eq!(assignment.status, AssignmentStatus::InProgress);
        assert_eq!(assignment.priority, QueuePriority::Stat);
        assert_eq!(assignment.priority_reason.as_deref(), Some("chest pain"));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = QueueAssignment::try_from(row("DONE", "ROUTINE")).unwrap_err();
        assert!(matches!(err, OpdError::Validation(_)));

        assert!(QueueAssignment::try_from(row("WAITING", "LOW")).is_err());
    }
}
