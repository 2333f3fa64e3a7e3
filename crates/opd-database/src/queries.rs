//! 数据库查询操作
//!
//! 进程内的按键加锁只覆盖单个服务实例，多实例部署时由唯一索引兜底：
//! 冲突写入以唯一约束错误返回，并映射为 `OpdError::Conflict`。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use opd_core::{OpdError, QueueAssignment, Result};
use opd_queue::{AssignmentStore, AssignmentUpdate, EncounterDirectory};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::DbQueueAssignment;

const UNIQUE_VIOLATION: &str = "23505";

/// 叫号顺序：优先级降序，同级按签到时间
const CALL_ORDER: &str = "ORDER BY CASE priority WHEN 'STAT' THEN 3 WHEN 'URGENT' THEN 2 ELSE 1 END DESC, \
                          assignment_date ASC, queue_number ASC";

fn db_error(e: sqlx::Error) -> OpdError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return OpdError::Conflict(db.message().to_string());
        }
    }
    OpdError::Database(e.to_string())
}

fn convert(rows: Vec<DbQueueAssignment>) -> Result<Vec<QueueAssignment>> {
    rows.into_iter().map(QueueAssignment::try_from).collect()
}

/// 创建数据库表
pub async fn create_tables(pool: &DatabasePool) -> Result<()> {
    let pool = pool.pool();

    // 创建就诊表（由就诊管理系统维护，这里只保证存在）
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS encounters (
            id UUID PRIMARY KEY,
            room_id VARCHAR(64)
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(db_error)?;

    // 创建排队分配表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_assignments (
            id UUID PRIMARY KEY,
            encounter_id UUID NOT NULL,
            room_id VARCHAR(64),
            queue_number INTEGER NOT NULL,
            queue_day DATE NOT NULL,
            assignment_date TIMESTAMP WITH TIME ZONE NOT NULL,
            assignment_expires_date TIMESTAMP WITH TIME ZONE NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'WAITING',
            priority VARCHAR(10) NOT NULL DEFAULT 'ROUTINE',
            priority_reason TEXT,
            estimated_wait_time INTEGER NOT NULL,
            called_at TIMESTAMP WITH TIME ZONE,
            called_by VARCHAR(64),
            created_by VARCHAR(64) NOT NULL,
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(db_error)?;

    create_indexes(pool).await?;

    info!("Database tables created successfully");
    Ok(())
}

/// 创建数据库索引
async fn create_indexes(pool: &sqlx::PgPool) -> Result<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_queue_room_date ON queue_assignments(room_id, assignment_date)",
        "CREATE INDEX IF NOT EXISTS idx_queue_encounter ON queue_assignments(encounter_id)",
        "CREATE INDEX IF NOT EXISTS idx_queue_status_expires ON queue_assignments(status, assignment_expires_date)",
        "CREATE INDEX IF NOT EXISTS idx_queue_day_room ON queue_assignments(queue_day, room_id)",
        // 同一就诊最多一个活跃分配
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_active_encounter ON queue_assignments(encounter_id) \
         WHERE is_deleted = FALSE AND status IN ('WAITING', 'IN_PROGRESS')",
        // 同一诊室同一天排队号唯一
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_room_day_number \
         ON queue_assignments(COALESCE(room_id, ''), queue_day, queue_number) WHERE is_deleted = FALSE",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await.map_err(db_error)?;
    }

    info!("Database indexes created successfully");
    Ok(())
}

/// 基于PostgreSQL的分配存储
#[derive(Debug, Clone)]
pub struct PgAssignmentStore {
    pool: DatabasePool,
}

impl PgAssignmentStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    async fn insert(&self, assignment: QueueAssignment) -> Result<QueueAssignment> {
        let row = sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            INSERT INTO queue_assignments (
                id, encounter_id, room_id, queue_number, queue_day, assignment_date,
                assignment_expires_date, status, priority, priority_reason, estimated_wait_time,
                called_at, called_by, created_by, is_deleted, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
        "#,
        )
        .bind(assignment.id)
        .bind(assignment.encounter_id)
        .bind(&assignment.room_id)
        .bind(assignment.queue_number)
        .bind(assignment.queue_day)
        .bind(assignment.assignment_date)
        .bind(assignment.assignment_expires_date)
        .bind(assignment.status.as_str())
        .bind(assignment.priority.as_str())
        .bind(&assignment.priority_reason)
        .bind(assignment.estimated_wait_time)
        .bind(assignment.called_at)
        .bind(&assignment.called_by)
        .bind(&assignment.created_by)
        .bind(assignment.is_deleted)
        .bind(assignment.created_at)
        .bind(assignment.updated_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        debug!("Inserted assignment {}", row.id);
        QueueAssignment::try_from(row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueAssignment>> {
        sqlx::query_as::<_, DbQueueAssignment>(
            "SELECT * FROM queue_assignments WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .map(QueueAssignment::try_from)
        .transpose()
    }

    async fn find_active_by_encounter(&self, encounter_id: Uuid) -> Result<Option<QueueAssignment>> {
        sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            SELECT * FROM queue_assignments
            WHERE encounter_id = $1 AND is_deleted = FALSE AND status IN ('WAITING', 'IN_PROGRESS')
            LIMIT 1
        "#,
        )
        .bind(encounter_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .map(QueueAssignment::try_from)
        .transpose()
    }

    async fn find_waiting(&self, room_id: Option<&str>) -> Result<Vec<QueueAssignment>> {
        let sql = format!(
            "SELECT * FROM queue_assignments \
             WHERE status = 'WAITING' AND is_deleted = FALSE AND ($1::TEXT IS NULL OR room_id = $1) {}",
            CALL_ORDER
        );
        let rows = sqlx::query_as::<_, DbQueueAssignment>(&sql)
            .bind(room_id)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_error)?;
        convert(rows)
    }

    async fn count_waiting(&self, room_id: Option<&str>, before: Option<DateTime<Utc>>) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM queue_assignments
            WHERE status = 'WAITING' AND is_deleted = FALSE
              AND ($1::TEXT IS NULL OR room_id = $1)
              AND ($2::TIMESTAMPTZ IS NULL OR assignment_date < $2)
        "#,
        )
        .bind(room_id)
        .bind(before)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        usize::try_from(count).map_err(|e| OpdError::Database(e.to_string()))
    }

    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<QueueAssignment>> {
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            SELECT * FROM queue_assignments
            WHERE status = 'WAITING' AND is_deleted = FALSE AND assignment_expires_date < $1
            ORDER BY assignment_expires_date ASC
        "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        convert(rows)
    }

    async fn find_recent_completed(&self, limit: usize) -> Result<Vec<QueueAssignment>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            SELECT * FROM queue_assignments
            WHERE status = 'COMPLETED' AND is_deleted = FALSE
            ORDER BY updated_at DESC
            LIMIT $1
        "#,
        )
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        convert(rows)
    }

    async fn find_by_rooms_on_day(&self, room_ids: &[String], day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            SELECT * FROM queue_assignments
            WHERE room_id = ANY($1) AND queue_day = $2 AND is_deleted = FALSE
        "#,
        )
        .bind(room_ids)
        .bind(day)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        convert(rows)
    }

    async fn update(&self, id: Uuid, update: AssignmentUpdate) -> Result<Option<QueueAssignment>> {
        // 条件写：期望状态不匹配或记录已删除时不更新任何行
        sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            UPDATE queue_assignments SET
                status = COALESCE($2, status),
                called_at = COALESCE($3, called_at),
                called_by = COALESCE($4, called_by),
                is_deleted = COALESCE($5, is_deleted),
                updated_at = COALESCE($6, updated_at)
            WHERE id = $1 AND is_deleted = FALSE AND ($7::TEXT IS NULL OR status = $7)
            RETURNING *
        "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.called_at)
        .bind(&update.called_by)
        .bind(update.is_deleted)
        .bind(update.updated_at)
        .bind(update.expected_status.map(|s| s.as_str()))
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .map(QueueAssignment::try_from)
        .transpose()
    }

    async fn max_queue_number(&self, room_id: Option<&str>, day: NaiveDate) -> Result<Option<i32>> {
        sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(queue_number) FROM queue_assignments
            WHERE room_id IS NOT DISTINCT FROM $1 AND queue_day = $2 AND is_deleted = FALSE
        "#,
        )
        .bind(room_id)
        .bind(day)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }
}

/// 基于 `encounters` 表的就诊目录
#[derive(Debug, Clone)]
pub struct PgEncounterDirectory {
    pool: DatabasePool,
}

impl PgEncounterDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EncounterDirectory for PgEncounterDirectory {
    async fn encounter_exists(&self, encounter_id: Uuid) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM encounters WHERE id = $1)")
            .bind(encounter_id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn encounter_room(&self, encounter_id: Uuid) -> Result<Option<String>> {
        let room = sqlx::query_scalar::<_, Option<String>>("SELECT room_id FROM encounters WHERE id = $1")
            .bind(encounter_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(room.flatten())
    }
}
