//! 通用工具函数

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// 按固定时区偏移计算某个时间点所属的自然日
///
/// 偏移超出合法范围时按 UTC 处理。
pub fn calendar_day(at: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => at.with_timezone(&offset).date_naive(),
        None => at.date_naive(),
    }
}

/// 两个时间点之间的分钟数（可为小数）
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}
