//! # 门诊排队调度模块
//!
//! 管理患者在诊室队列中的完整生命周期，包括：
//! - 签到排号：按（诊室, 自然日）分配连续的排队号
//! - 叫号：优先级优先、同级先到先服务，并发叫号不会重复叫同一位患者
//! - 状态机：等待、就诊中以及各终态之间的合法转换
//! - 自动过期：后台定时把超过有效期的等待记录转为过期
//! - 看板统计：跨诊室的等待和就诊中人数

pub mod encounter;
pub mod estimator;
pub mod locks;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod sequence;
pub mod settings;
pub mod state_machine;
pub mod stats;
pub mod store;
pub mod sweeper;

// 重新导出主要类型
pub use encounter::{EncounterDirectory, MemoryEncounterDirectory};
pub use estimator::WaitTimeEstimator;
pub use locks::KeyedLocks;
pub use manager::QueueManager;
pub use memory::MemoryAssignmentStore;
pub use metrics::QueueMetrics;
pub use sequence::{SequenceAllocator, SequenceLease};
pub use settings::QueueSettings;
pub use state_machine::{AssignmentStateMachine, QueueEvent};
pub use stats::RoomStatsAggregator;
pub use store::{AssignmentStore, AssignmentUpdate};
pub use sweeper::{AuditSink, ExpirySweeper, TracingAuditSink};
