//! 队列监控指标

use opd_core::{AssignmentStatus, OpdError, QueuePriority, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// 队列指标收集器
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    /// Prometheus指标注册表
    registry: Registry,
    /// 按优先级统计的签到数
    assignments_created: IntCounterVec,
    /// 按目标状态统计的状态转换
    transitions: IntCounterVec,
    /// 空队列叫号次数
    call_next_empty: IntCounter,
    sweeps_total: IntCounter,
    sweep_failures_total: IntCounter,
}

impl QueueMetrics {
    /// 创建并注册所有指标
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let assignments_created = IntCounterVec::new(
            Opts::new("opd_queue_assignments_created_total", "Queue assignments created"),
            &["priority"],
        )
        .map_err(metric_error)?;

        let transitions = IntCounterVec::new(
            Opts::new("opd_queue_transitions_total", "Assignment status transitions"),
            &["status"],
        )
        .map_err(metric_error)?;

        let call_next_empty = IntCounter::with_opts(Opts::new(
            "opd_queue_call_next_empty_total",
            "Call-next requests that found no waiting patient",
        ))
        .map_err(metric_error)?;

        let sweeps_total = IntCounter::with_opts(Opts::new(
            "opd_queue_sweeps_total",
            "Auto-expire sweeps executed",
        ))
        .map_err(metric_error)?;

        let sweep_failures_total = IntCounter::with_opts(Opts::new(
            "opd_queue_sweep_failures_total",
            "Assignments that failed to expire during a sweep",
        ))
        .map_err(metric_error)?;

        registry.register(Box::new(assignments_created.clone())).map_err(metric_error)?;
        registry.register(Box::new(transitions.clone())).map_err(metric_error)?;
        registry.register(Box::new(call_next_empty.clone())).map_err(metric_error)?;
        registry.register(Box::new(sweeps_total.clone())).map_err(metric_error)?;
        registry.register(Box::new(sweep_failures_total.clone())).map_err(metric_error)?;

        Ok(Self {
            registry,
            assignments_created,
            transitions,
            call_next_empty,
            sweeps_total,
            sweep_failures_total,
        })
    }

    pub fn record_created(&self, priority: QueuePriority) {
        self.assignments_created.with_label_values(&[priority.as_str()]).inc();
    }

    pub fn record_transition(&self, status: AssignmentStatus) {
        self.transitions.with_label_values(&[status.as_str()]).inc();
    }

    pub fn record_empty_call(&self) {
        self.call_next_empty.inc();
    }

    pub fn record_sweep(&self, expired: usize, failures: usize) {
        self.sweeps_total.inc();
        self.transitions
            .with_label_values(&[AssignmentStatus::Expired.as_str()])
            .inc_by(expired as u64);
        self.sweep_failures_total.inc_by(failures as u64);
    }

    /// 某个目标状态的累计转换次数
    pub fn transition_count(&self, status: AssignmentStatus) -> u64 {
        self.transitions.with_label_values(&[status.as_str()]).get()
    }

    /// 导出 Prometheus 文本格式
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(metric_error)?;

        String::from_utf8(buffer).map_err(|e| OpdError::Internal(e.to_string()))
    }
}

fn metric_error(e: prometheus::Error) -> OpdError {
    OpdError::Internal(format!("metrics: {}", e))
}
