//! 排队管理器
//!
//! 分配状态的唯一写入方。签到、叫号、完成、过期、跳过、取消和自动过期清理
//! 都经过这里，读写之间的竞争通过按键加锁和存储层的条件写共同保证。

use chrono::Duration;
use opd_core::utils::{calendar_day, minutes_between};
use opd_core::{
    AssignmentStatus, ClockSource, CreateAssignmentRequest, OpdError, QueueAssignment, Result,
    SweepFailure, SweepReport, WaitTimeInfo,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::encounter::EncounterDirectory;
use crate::estimator::WaitTimeEstimator;
use crate::locks::KeyedLocks;
use crate::metrics::QueueMetrics;
use crate::sequence::SequenceAllocator;
use crate::settings::QueueSettings;
use crate::state_machine::{AssignmentStateMachine, QueueEvent};
use crate::store::{AssignmentStore, AssignmentUpdate};

/// 叫号竞争域：全局叫号和按诊室叫号分开加锁
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CallScope {
    Global,
    Room(String),
}

impl CallScope {
    fn of(room_id: Option<&str>) -> Self {
        match room_id {
            Some(room) => CallScope::Room(room.to_string()),
            None => CallScope::Global,
        }
    }
}

/// 排队管理器
pub struct QueueManager {
    store: Arc<dyn AssignmentStore>,
    encounters: Arc<dyn EncounterDirectory>,
    clock: Arc<dyn ClockSource>,
    settings: QueueSettings,
    estimator: WaitTimeEstimator,
    state_machine: AssignmentStateMachine,
    sequences: SequenceAllocator,
    encounter_locks: KeyedLocks<Uuid>,
    call_locks: KeyedLocks<CallScope>,
    metrics: QueueMetrics,
}

impl QueueManager {
    /// 创建新的排队管理器
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        encounters: Arc<dyn EncounterDirectory>,
        clock: Arc<dyn ClockSource>,
        settings: QueueSettings,
    ) -> Result<Self> {
        Ok(Self {
            sequences: SequenceAllocator::new(store.clone()),
            estimator: WaitTimeEstimator::from_settings(&settings),
            state_machine: AssignmentStateMachine::new(),
            encounter_locks: KeyedLocks::new(),
            call_locks: KeyedLocks::new(),
            metrics: QueueMetrics::new()?,
            store,
            encounters,
            clock,
            settings,
        })
    }

    /// 患者签到，进入诊室队列
    pub async fn create(&self, request: CreateAssignmentRequest) -> Result<QueueAssignment> {
        let created_by = request.created_by.trim();
        if created_by.is_empty() {
            return Err(OpdError::Validation("created_by must not be empty".to_string()));
        }

        let encounter_id = request.encounter_id;
        let priority = request.priority.unwrap_or_default();

        // 同一就诊的并发签到串行化，保证最多一个活跃分配
        let _encounter_guard = self.encounter_locks.lock(encounter_id).await;

        if !self.encounters.encounter_exists(encounter_id).await? {
            return Err(OpdError::NotFound(format!("encounter {} not found", encounter_id)));
        }

        if let Some(active) = self.store.find_active_by_encounter(encounter_id).await? {
            return Err(OpdError::Conflict(format!(
                "encounter {} is already checked in (assignment {}, queue number {}, {})",
                encounter_id, active.id, active.queue_number, active.status
            )));
        }

        let room_id = match request.room_id.filter(|room| !room.trim().is_empty()) {
            Some(room) => Some(room),
            None => self.encounters.encounter_room(encounter_id).await?,
        };

        let now = self.clock.now();
        let day = calendar_day(now, self.settings.utc_offset_minutes);
        let expires_at = Duration::try_hours(self.settings.assignment_ttl_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                OpdError::Config(format!(
                    "assignment_ttl_hours {} is out of range",
                    self.settings.assignment_ttl_hours
                ))
            })?;

        let lease = self.sequences.next(room_id.as_deref(), day).await?;
        let waiting = self.store.count_waiting(room_id.as_deref(), None).await?;
        let estimated_wait_time = self.estimator.estimate(waiting, priority);

        let assignment = QueueAssignment {
            id: Uuid::new_v4(),
            encounter_id,
            room_id,
            queue_number: lease.queue_number,
            queue_day: day,
            assignment_date: now,
            assignment_expires_date: expires_at,
            status: AssignmentStatus::Waiting,
            priority,
            priority_reason: request.priority_reason,
            estimated_wait_time,
            called_at: None,
            called_by: None,
            created_by: created_by.to_string(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let created = self.store.insert(assignment).await?;
        drop(lease);

        self.metrics.record_created(priority);
        info!(
            "Created assignment {} for encounter {} in room {:?}: number {}, priority {}, estimated {} min",
            created.id, encounter_id, created.room_id, created.queue_number, priority, estimated_wait_time
        );
        Ok(created)
    }

    /// 叫下一位：最高优先级中最早签到的等待者转为就诊中
    pub async fn call_next(&self, room_id: Option<&str>, called_by: Option<&str>) -> Result<QueueAssignment> {
        let _call_guard = self.call_locks.lock(CallScope::of(room_id)).await;

        for attempt in 1..=self.settings.max_transition_attempts {
            let candidate = match self.store.find_waiting(room_id).await?.into_iter().next() {
                Some(candidate) => candidate,
                None => {
                    self.metrics.record_empty_call();
                    return Err(OpdError::QueueEmpty(match room_id {
                        Some(room) => format!("no waiting patient in room {}", room),
                        None => "no waiting patient".to_string(),
                    }));
                }
            };

            let target = self.state_machine.transition(candidate.status, QueueEvent::Call)?;
            let now = self.clock.now();
            let update = AssignmentUpdate::transition(candidate.status, target, now)
                .called(called_by.map(str::to_owned), now);

            if let Some(called) = self.store.update(candidate.id, update).await? {
                self.metrics.record_transition(target);
                info!(
                    "Called assignment {} (number {}, {}) in room {:?} by {:?}",
                    called.id, called.queue_number, called.priority, called.room_id, called_by
                );
                return Ok(called);
            }

            // 另一个竞争域（全局叫号或过期清理）先改了这条记录
            warn!(
                "Assignment {} changed while calling (attempt {}), reselecting",
                candidate.id, attempt
            );
        }

        Err(OpdError::Internal(format!(
            "call next for {:?} still contended after {} attempts",
            room_id, self.settings.max_transition_attempts
        )))
    }

    /// 完成就诊
    pub async fn complete(&self, id: Uuid) -> Result<QueueAssignment> {
        self.apply_event(id, QueueEvent::Complete).await
    }

    /// 手动过期
    pub async fn expire(&self, id: Uuid) -> Result<QueueAssignment> {
        self.apply_event(id, QueueEvent::Expire).await
    }

    /// 跳过
    pub async fn skip(&self, id: Uuid) -> Result<QueueAssignment> {
        self.apply_event(id, QueueEvent::Skip).await
    }

    /// 取消（患者在叫号前离开）
    pub async fn cancel(&self, id: Uuid) -> Result<QueueAssignment> {
        self.apply_event(id, QueueEvent::Cancel).await
    }

    /// 读取、校验、条件写入；条件写失败说明状态被并发修改，重新读取再判断
    async fn apply_event(&self, id: Uuid, event: QueueEvent) -> Result<QueueAssignment> {
        for attempt in 1..=self.settings.max_transition_attempts {
            let current = self.get(id).await?;
            let target = self.state_machine.transition(current.status, event)?;

            let update = AssignmentUpdate::transition(current.status, target, self.clock.now());
            if let Some(updated) = self.store.update(id, update).await? {
                self.metrics.record_transition(target);
                info!(
                    "Assignment {} status updated from {} to {} ({})",
                    id, current.status, target, event.as_str()
                );
                return Ok(updated);
            }

            warn!(
                "Assignment {} changed during {} (attempt {}), retrying",
                id, event.as_str(), attempt
            );
        }

        Err(OpdError::Internal(format!(
            "{} of assignment {} still contended after {} attempts",
            event.as_str(), id, self.settings.max_transition_attempts
        )))
    }

    /// 自动过期清理
    ///
    /// 单条失败不影响其余记录；已被并发改动的记录直接跳过，所以重复执行不会产生新的转换。
    pub async fn auto_expire_sweep(&self, now: chrono::DateTime<chrono::Utc>) -> Result<SweepReport> {
        let candidates = self.store.find_expirable(now).await?;
        debug!("Auto-expire sweep found {} candidates", candidates.len());

        let mut report = SweepReport::default();
        for candidate in candidates {
            let update = AssignmentUpdate::transition(AssignmentStatus::Waiting, AssignmentStatus::Expired, now);

            match self.store.update(candidate.id, update).await {
                Ok(Some(expired)) => report.expired.push(expired),
                Ok(None) => debug!("Assignment {} no longer waiting, skipped", candidate.id),
                Err(e) => {
                    warn!("Failed to expire assignment {}: {}", candidate.id, e);
                    report.failures.push(SweepFailure {
                        assignment_id: candidate.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.expired_count = report.expired.len();
        self.metrics.record_sweep(report.expired_count, report.failures.len());

        if report.expired_count > 0 || !report.failures.is_empty() {
            info!(
                "Auto-expire sweep expired {} assignments ({} failures)",
                report.expired_count,
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// 以当前时钟执行自动过期清理
    pub async fn run_auto_expire_sweep(&self) -> Result<SweepReport> {
        self.auto_expire_sweep(self.clock.now()).await
    }

    /// 等待时间：创建时的预估值 + 当前位置 + 最近完成记录的平均等待
    pub async fn get_estimated_wait_time(&self, id: Uuid) -> Result<WaitTimeInfo> {
        let assignment = self.get(id).await?;

        let ahead = self
            .store
            .count_waiting(assignment.room_id.as_deref(), Some(assignment.assignment_date))
            .await?;

        let samples = self
            .store
            .find_recent_completed(self.settings.average_sample_size)
            .await?;
        let average_minutes = if samples.is_empty() {
            self.settings.default_average_minutes
        } else {
            let total: f64 = samples
                .iter()
                .map(|sample| minutes_between(sample.assignment_date, sample.updated_at))
                .sum();
            total / samples.len() as f64
        };

        Ok(WaitTimeInfo {
            assignment_id: assignment.id,
            position: ahead + 1,
            estimated_minutes: assignment.estimated_wait_time,
            average_minutes,
        })
    }

    /// 校验排队凭证：记录存在、仍然活跃且未到有效期
    pub async fn validate_token(&self, id: Uuid) -> Result<QueueAssignment> {
        let assignment = self.get(id).await?;

        if !assignment.status.is_active() {
            return Err(OpdError::invalid_state(assignment.status, "validate token"));
        }
        if self.clock.now() >= assignment.assignment_expires_date {
            return Err(OpdError::invalid_state(assignment.status, "validate token after expiry"));
        }

        Ok(assignment)
    }

    /// 查询单条分配
    pub async fn get(&self, id: Uuid) -> Result<QueueAssignment> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| OpdError::NotFound(format!("assignment {} not found", id)))
    }

    /// 等待队列（叫号顺序）
    pub async fn list_waiting(&self, room_id: Option<&str>) -> Result<Vec<QueueAssignment>> {
        self.store.find_waiting(room_id).await
    }

    /// 软删除，记录保留用于审计
    pub async fn delete(&self, id: Uuid) -> Result<QueueAssignment> {
        let deleted = self
            .store
            .update(id, AssignmentUpdate::soft_delete(self.clock.now()))
            .await?
            .ok_or_else(|| OpdError::NotFound(format!("assignment {} not found", id)))?;

        info!("Soft-deleted assignment {}", id);
        Ok(deleted)
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("settings", &self.settings)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encounter::MemoryEncounterDirectory;
    use crate::memory::MemoryAssignmentStore;
    use chrono::{TimeZone, Utc};
    use opd_core::{ManualClock, QueuePriority};

    struct Fixture {
        manager: QueueManager,
        clock: Arc<ManualClock>,
        encounters: Arc<MemoryEncounterDirectory>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
        let encounters = Arc::new(MemoryEncounterDirectory::permissive());
        let manager = QueueManager::new(
            Arc::new(MemoryAssignmentStore::new()),
            encounters.clone(),
            clock.clone(),
            QueueSettings::default(),
        )
        .unwrap();

        Fixture { manager, clock, encounters }
    }

    fn request(room: Option<&str>, priority: Option<QueuePriority>) -> CreateAssignmentRequest {
        CreateAssignmentRequest {
            encounter_id: Uuid::new_v4(),
            room_id: room.map(str::to_owned),
            priority,
            priority_reason: None,
            created_by: "desk-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_sets_lifecycle_fields() {
        let f = fixture();
        let a = f.manager.create(request(Some("R1"), None)).await.unwrap();

        assert_eq!(a.status, AssignmentStatus::Waiting);
        assert_eq!(a.priority, QueuePriority::Routine);
        assert_eq!(a.assignment_date, f.clock.now());
        assert_eq!(a.assignment_expires_date - a.assignment_date, Duration::hours(24));
        assert_eq!(a.queue_day, f.clock.now().date_naive());
    }

    #[tokio::test]
    async fn test_estimate_uses_room_scoped_waiting_count() {
        let f = fixture();
        f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.manager.create(request(Some("R2"), None)).await.unwrap();

        let third = f.manager.create(request(Some("R1"), None)).await.unwrap();
        assert_eq!(third.estimated_wait_time, 30);

        let urgent = f.manager.create(request(Some("R1"), Some(QueuePriority::Urgent))).await.unwrap();
        assert_eq!(urgent.estimated_wait_time, 10);
    }

    #[tokio::test]
    async fn test_unknown_encounter_is_not_found() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = QueueManager::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(MemoryEncounterDirectory::new()),
            clock,
            QueueSettings::default(),
        )
        .unwrap();

        let err = manager.create(request(Some("R1"), None)).await.unwrap_err();
        assert!(matches!(err, OpdError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_room_defaults_to_encounter_room() {
        let f = fixture();
        let req = request(None, None);
        f.encounters.register(req.encounter_id, Some("R9".to_string())).await;

        let a = f.manager.create(req).await.unwrap();
        assert_eq!(a.room_id.as_deref(), Some("R9"));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_config_error() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
        let manager = QueueManager::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(MemoryEncounterDirectory::permissive()),
            clock,
            QueueSettings {
                assignment_ttl_hours: 1_000_000_000_000,
                ..QueueSettings::default()
            },
        )
        .unwrap();

        let err = manager.create(request(Some("R1"), None)).await.unwrap_err();
        assert!(matches!(err, OpdError::Config(_)));
        assert!(manager.list_waiting(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_operator_rejected() {
        let f = fixture();
        let mut req = request(Some("R1"), None);
        req.created_by = "  ".to_string();

        let err = f.manager.create(req).await.unwrap_err();
        assert!(matches!(err, OpdError::Validation(_)));
    }

    #[tokio::test]
    async fn test_numbering_restarts_next_day() {
        let f = fixture();
        f.manager.create(request(Some("R1"), None)).await.unwrap();
        let second = f.manager.create(request(Some("R1"), None)).await.unwrap();
        assert_eq!(second.queue_number, 2);

        f.clock.advance(Duration::days(1));
        let next_day = f.manager.create(request(Some("R1"), None)).await.unwrap();
        assert_eq!(next_day.queue_number, 1);
    }

    #[tokio::test]
    async fn test_call_next_empty_room() {
        let f = fixture();
        f.manager.create(request(Some("R2"), None)).await.unwrap();

        let err = f.manager.call_next(Some("R1"), None).await.unwrap_err();
        assert!(matches!(err, OpdError::QueueEmpty(_)));
        assert_eq!(err.code(), "QUEUE_EMPTY");
    }

    #[tokio::test]
    async fn test_call_next_fifo_within_priority() {
        let f = fixture();
        let first = f.manager.create(request(Some("R1"), Some(QueuePriority::Urgent))).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        let second = f.manager.create(request(Some("R1"), Some(QueuePriority::Urgent))).await.unwrap();

        let called = f.manager.call_next(Some("R1"), Some("dr-wang")).await.unwrap();
        assert_eq!(called.id, first.id);
        assert_eq!(called.called_by.as_deref(), Some("dr-wang"));

        let called = f.manager.call_next(Some("R1"), None).await.unwrap();
        assert_eq!(called.id, second.id);
        assert_eq!(called.called_by, None);
    }

    #[tokio::test]
    async fn test_transition_rules() {
        let f = fixture();
        let a = f.manager.create(request(Some("R1"), None)).await.unwrap();

        let called = f.manager.call_next(Some("R1"), None).await.unwrap();
        assert_eq!(called.id, a.id);

        // 就诊中不能取消
        let err = f.manager.cancel(a.id).await.unwrap_err();
        assert!(matches!(err, OpdError::InvalidState { .. }));

        let done = f.manager.complete(a.id).await.unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);

        let err = f.manager.expire(a.id).await.unwrap_err();
        assert!(matches!(err, OpdError::InvalidState { .. }));
        let err = f.manager.skip(a.id).await.unwrap_err();
        assert!(matches!(err, OpdError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_skip_and_cancel_are_terminal() {
        let f = fixture();
        let skipped = f.manager.create(request(Some("R1"), None)).await.unwrap();
        let cancelled = f.manager.create(request(Some("R1"), None)).await.unwrap();

        assert_eq!(f.manager.skip(skipped.id).await.unwrap().status, AssignmentStatus::Skipped);
        assert_eq!(f.manager.cancel(cancelled.id).await.unwrap().status, AssignmentStatus::Cancelled);

        assert!(f.manager.complete(skipped.id).await.is_err());
        assert!(f.manager.expire(cancelled.id).await.is_err());
        assert!(f.manager.call_next(Some("R1"), None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let f = fixture();
        let id = Uuid::new_v4();

        for result in [
            f.manager.complete(id).await,
            f.manager.expire(id).await,
            f.manager.skip(id).await,
            f.manager.cancel(id).await,
            f.manager.validate_token(id).await,
            f.manager.delete(id).await,
        ] {
            assert!(matches!(result, Err(OpdError::NotFound(_))));
        }
        assert!(f.manager.get_estimated_wait_time(id).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_token() {
        let f = fixture();
        let a = f.manager.create(request(Some("R1"), None)).await.unwrap();
        assert_eq!(f.manager.validate_token(a.id).await.unwrap().id, a.id);

        f.clock.advance(Duration::hours(25));
        let err = f.manager.validate_token(a.id).await.unwrap_err();
        assert!(matches!(err, OpdError::InvalidState { .. }));

        let b = f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.manager.complete(b.id).await.unwrap();
        assert!(f.manager.validate_token(b.id).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_time_position_and_average() {
        let f = fixture();
        let first = f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        f.manager.create(request(Some("R2"), None)).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        let third = f.manager.create(request(Some("R1"), None)).await.unwrap();

        let info = f.manager.get_estimated_wait_time(third.id).await.unwrap();
        assert_eq!(info.position, 2);
        assert_eq!(info.estimated_minutes, third.estimated_wait_time);
        assert!((info.average_minutes - 15.0).abs() < f64::EPSILON);

        // first 签到于 08:00，08:20 完成
        f.clock.set(first.assignment_date + Duration::minutes(20));
        f.manager.complete(first.id).await.unwrap();

        let info = f.manager.get_estimated_wait_time(third.id).await.unwrap();
        assert_eq!(info.position, 1);
        assert!((info.average_minutes - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unassigned_position_is_global() {
        let f = fixture();
        f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        let unassigned = f.manager.create(request(None, None)).await.unwrap();

        let info = f.manager.get_estimated_wait_time(unassigned.id).await.unwrap();
        assert_eq!(info.position, 2);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_assignment() {
        let f = fixture();
        let a = f.manager.create(request(Some("R1"), None)).await.unwrap();

        let deleted = f.manager.delete(a.id).await.unwrap();
        assert!(deleted.is_deleted);

        assert!(f.manager.get(a.id).await.unwrap_err().is_not_found());
        assert!(f.manager.list_waiting(Some("R1")).await.unwrap().is_empty());

        // 删除后同一就诊可以重新签到
        let again = CreateAssignmentRequest {
            encounter_id: a.encounter_id,
            ..request(Some("R1"), None)
        };
        assert!(f.manager.create(again).await.is_ok());
    }

    #[tokio::test]
    async fn test_transitions_are_counted() {
        let f = fixture();
        let a = f.manager.create(request(Some("R1"), None)).await.unwrap();
        f.manager.call_next(None, None).await.unwrap();
        f.manager.complete(a.id).await.unwrap();

        assert_eq!(f.manager.metrics().transition_count(AssignmentStatus::InProgress), 1);
        assert_eq!(f.manager.metrics().transition_count(AssignmentStatus::Completed), 1);
    }
}
