use serde::Serialize;

use crate::models::process::ProcessState;

/// 观测到的状态跳变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub id: String,
    pub name: String,
    pub previous: ProcessState,
    pub current: ProcessState,
    pub at: u64,
}

/// 事件总线上分发的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    StatusChanged(StatusChange),
    PersistFailed { operation: String, message: String },
}
