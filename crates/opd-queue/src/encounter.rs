//! 就诊信息接口
//!
//! 排队核心只需要知道就诊是否存在，以及它默认对应的诊室。

use async_trait::async_trait;
use opd_core::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 就诊信息查询
#[async_trait]
pub trait EncounterDirectory: Send + Sync {
    async fn encounter_exists(&self, encounter_id: Uuid) -> Result<bool>;

    /// 就诊默认诊室，用于签到时未指定诊室的情况
    async fn encounter_room(&self, encounter_id: Uuid) -> Result<Option<String>>;
}

/// 内存就诊目录
#[derive(Debug, Default)]
pub struct MemoryEncounterDirectory {
    encounters: RwLock<HashMap<Uuid, Option<String>>>,
    accept_unknown: bool,
}

impl MemoryEncounterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不做存在性校验的目录，未登记的就诊视为存在且没有默认诊室
    pub fn permissive() -> Self {
        Self {
            encounters: RwLock::new(HashMap::new()),
            accept_unknown: true,
        }
    }

    /// 登记就诊
    pub async fn register(&self, encounter_id: Uuid, room_id: Option<String>) {
        self.encounters.write().await.insert(encounter_id, room_id);
    }
}

#[async_trait]
impl EncounterDirectory for MemoryEncounterDirectory {
    async fn encounter_exists(&self, encounter_id: Uuid) -> Result<bool> {
        Ok(self.accept_unknown || self.encounters.read().await.contains_key(&encounter_id))
    }

    async fn encounter_room(&self, encounter_id: Uuid) -> Result<Option<String>> {
        Ok(self.encounters.read().await.get(&encounter_id).cloned().flatten())
    }
}
