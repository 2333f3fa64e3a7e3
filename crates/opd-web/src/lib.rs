//! # 门诊排队Web服务模块
//!
//! 提供前台签到、叫号、状态流转和看板统计的HTTP接口。

pub mod error;
pub mod handlers;
pub mod server;

use opd_queue::{QueueManager, RoomStatsAggregator};
use std::sync::Arc;

pub use error::{ApiError, ApiResult};
pub use server::WebServer;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<QueueManager>,
    pub stats: Arc<RoomStatsAggregator>,
}

impl AppState {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        let stats = RoomStatsAggregator::new(
            manager.store().clone(),
            manager.clock().clone(),
            manager.settings().utc_offset_minutes,
        );
        Self {
            manager,
            stats: Arc::new(stats),
        }
    }
}
