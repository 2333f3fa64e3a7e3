//! 自动过期后台任务
//!
//! 按固定间隔调用 `QueueManager::run_auto_expire_sweep`，
//! 有结果时交给审计出口记录。

use async_trait::async_trait;
use opd_core::{Result, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::manager::QueueManager;

/// 过期审计出口
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_expired(&self, report: &SweepReport) -> Result<()>;
}

/// 写入日志的审计出口
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_expired(&self, report: &SweepReport) -> Result<()> {
        for assignment in &report.expired {
            info!(
                assignment_id = %assignment.id,
                encounter_id = %assignment.encounter_id,
                room_id = ?assignment.room_id,
                queue_number = assignment.queue_number,
                "Assignment expired"
            );
        }
        for failure in &report.failures {
            warn!(assignment_id = %failure.assignment_id, "Assignment expiry failed: {}", failure.message);
        }
        Ok(())
    }
}

/// 过期清理调度器
pub struct ExpirySweeper {
    manager: Arc<QueueManager>,
    audit: Arc<dyn AuditSink>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(manager: Arc<QueueManager>, audit: Arc<dyn AuditSink>, interval: Duration) -> Self {
        Self {
            manager,
            audit,
            interval,
        }
    }

    /// 执行一次清理
    pub async fn run_once(&self) -> Result<SweepReport> {
        let report = self.manager.run_auto_expire_sweep().await?;

        if report.expired_count > 0 || !report.failures.is_empty() {
            if let Err(e) = self.audit.record_expired(&report).await {
                warn!("Failed to record expiry audit: {}", e);
            }
        }
        Ok(report)
    }

    /// 循环执行直到收到关闭信号
    ///
    /// 进行中的一轮清理会跑完才检查关闭信号。
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Expiry sweeper started, interval {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Auto-expire sweep failed: {}", e);
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// 在后台任务中运行
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
