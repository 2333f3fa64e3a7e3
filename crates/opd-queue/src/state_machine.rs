//! 分配状态机
//!
//! 管理排队分配从签到到结束的状态转换

use opd_core::{AssignmentStatus, OpdError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 分配状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    Call,
    Complete,
    Expire,
    Cancel,
    Skip,
}

impl QueueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEvent::Call => "call",
            QueueEvent::Complete => "complete",
            QueueEvent::Expire => "expire",
            QueueEvent::Cancel => "cancel",
            QueueEvent::Skip => "skip",
        }
    }
}

/// 分配状态机
#[derive(Debug)]
pub struct AssignmentStateMachine {
    transitions: HashMap<(AssignmentStatus, QueueEvent), AssignmentStatus>,
}

impl AssignmentStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        use AssignmentStatus::*;

        let mut transitions = HashMap::new();

        // 定义状态转换规则，终态没有任何出边
        transitions.insert((Waiting, QueueEvent::Call), InProgress);
        transitions.insert((Waiting, QueueEvent::Complete), Completed);
        transitions.insert((InProgress, QueueEvent::Complete), Completed);
        transitions.insert((Waiting, QueueEvent::Expire), Expired);
        transitions.insert((InProgress, QueueEvent::Expire), Expired);
        transitions.insert((Waiting, QueueEvent::Cancel), Cancelled);
        transitions.insert((Waiting, QueueEvent::Skip), Skipped);
        transitions.insert((InProgress, QueueEvent::Skip), Skipped);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: AssignmentStatus, event: QueueEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: AssignmentStatus, event: QueueEvent) -> Result<AssignmentStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| OpdError::invalid_state(from, event.as_str()))
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current_state: AssignmentStatus) -> Vec<QueueEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current_state)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for AssignmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
