//! 等待时间预估
//!
//! 纯函数：只依赖当前等待人数和优先级，不读写任何状态。

use opd_core::QueuePriority;

use crate::settings::QueueSettings;

/// 等待时间预估器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeEstimator {
    minutes_per_patient: i32,
    stat_cap_minutes: i32,
    urgent_cap_minutes: i32,
    minimum_wait_minutes: i32,
}

impl WaitTimeEstimator {
    pub fn new(
        minutes_per_patient: i32,
        stat_cap_minutes: i32,
        urgent_cap_minutes: i32,
        minimum_wait_minutes: i32,
    ) -> Self {
        Self {
            minutes_per_patient,
            stat_cap_minutes,
            urgent_cap_minutes,
            minimum_wait_minutes,
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(
            settings.minutes_per_patient,
            settings.stat_cap_minutes,
            settings.urgent_cap_minutes,
            settings.minimum_wait_minutes,
        )
    }

    /// 预估等待分钟数
    ///
    /// `base = waiting_count × minutes_per_patient`，STAT/URGENT 分别封顶，
    /// 最终结果不低于最小等待时间。
    pub fn estimate(&self, waiting_count: usize, priority: QueuePriority) -> i32 {
        let count = i64::try_from(waiting_count).unwrap_or(i64::MAX);
        let base = count.saturating_mul(i64::from(self.minutes_per_patient));

        let capped = match priority {
            QueuePriority::Stat => base.min(i64::from(self.stat_cap_minutes)),
            QueuePriority::Urgent => base.min(i64::from(self.urgent_cap_minutes)),
            QueuePriority::Routine => base,
        };

        let floored = capped.max(i64::from(self.minimum_wait_minutes));
        i32::try_from(floored).unwrap_or(i32::MAX)
    }
}

impl Default for WaitTimeEstimator {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}
