//! 排队调度参数

use serde::{Deserialize, Serialize};

/// 队列配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// 分配有效期（小时）
    pub assignment_ttl_hours: i64,
    /// 每位等待患者折算的分钟数
    pub minutes_per_patient: i32,
    /// STAT 优先级的预估上限
    pub stat_cap_minutes: i32,
    /// URGENT 优先级的预估上限
    pub urgent_cap_minutes: i32,
    /// 预估等待的最小值
    pub minimum_wait_minutes: i32,
    /// 计算平均等待时取最近完成记录的条数
    pub average_sample_size: usize,
    /// 无样本时的平均等待
    pub default_average_minutes: f64,
    /// 划分自然日所用的时区偏移（分钟）
    pub utc_offset_minutes: i32,
    /// 乐观并发冲突时的最大重试次数
    pub max_transition_attempts: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            assignment_ttl_hours: 24,
            minutes_per_patient: 15,
            stat_cap_minutes: 5,
            urgent_cap_minutes: 10,
            minimum_wait_minutes: 5,
            average_sample_size: 10,
            default_average_minutes: 15.0,
            utc_offset_minutes: 0,
            max_transition_attempts: 5,
        }
    }
}
