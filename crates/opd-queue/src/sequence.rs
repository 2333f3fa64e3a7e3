//! 排队号分配
//!
//! 号码在（诊室, 自然日）分区内单调递增。分配和随后的写入必须作为一个整体
//! 串行执行，所以 `next` 返回一个持锁的租约，调用方写完记录再释放。

use chrono::NaiveDate;
use opd_core::Result;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::locks::KeyedLocks;
use crate::store::AssignmentStore;

/// 排号分区键
pub type SequenceKey = (Option<String>, NaiveDate);

/// 已预留的号码
///
/// 租约存活期间同一分区的其它分配会等待。
#[derive(Debug)]
pub struct SequenceLease {
    pub queue_number: i32,
    pub day: NaiveDate,
    _guard: OwnedMutexGuard<()>,
}

/// 排队号分配器
pub struct SequenceAllocator {
    store: Arc<dyn AssignmentStore>,
    locks: KeyedLocks<SequenceKey>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// 预留下一个号码：当天该诊室未删除记录的最大号码加一，没有记录时为1
    pub async fn next(&self, room_id: Option<&str>, day: NaiveDate) -> Result<SequenceLease> {
        let guard = self.locks.lock((room_id.map(str::to_owned), day)).await;
        let current = self.store.max_queue_number(room_id, day).await?;
        let queue_number = current.map_or(1, |max| max + 1);

        tracing::debug!("Reserved queue number {} for room {:?} on {}", queue_number, room_id, day);
        Ok(SequenceLease {
            queue_number,
            day,
            _guard: guard,
        })
    }
}

impl std::fmt::Debug for SequenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator").finish_non_exhaustive()
    }
}
