//! 按键加锁
//!
//! 每个竞争键（诊室+日期、诊室、就诊）一把异步互斥锁，不同键之间互不阻塞。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 超过该数量时清理无人持有的锁
const PRUNE_THRESHOLD: usize = 1024;

/// 按键划分的互斥锁集合
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 获取某个键的锁，守卫释放前同键的其它调用者会等待
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.len() >= PRUNE_THRESHOLD {
                // 引用计数为1说明只有表本身持有，没有人在等待或持锁
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(key).or_default().clone()
        };

        slot.lock_owned().await
    }

    /// 当前登记的键数量
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
