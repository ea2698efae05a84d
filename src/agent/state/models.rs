//! agent 状态数据结构

use crate::agent::collection::models::RunStatus;
use crate::agent::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 连接模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// 后端不可达，数据落本地队列
    #[default]
    Standalone,
    /// 后端可达
    Connected,
}

impl AgentMode {
    pub fn is_connected(&self) -> bool {
        matches!(self, AgentMode::Connected)
    }
}

/// 单个平台的会话缓存（不含凭据本身）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub valid: bool,
    /// 最近一次检查时间（毫秒），0 表示从未检查
    #[serde(rename = "lastChecked")]
    pub last_checked: i64,
}

/// agent 整体状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub mode: AgentMode,
    pub sessions: BTreeMap<Platform, SessionInfo>,
    #[serde(rename = "lastSyncStatus", default)]
    pub last_sync_status: Option<RunStatus>,
    #[serde(rename = "lastHeartbeat", default)]
    pub last_heartbeat: Option<i64>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            mode: AgentMode::Standalone,
            sessions: Platform::ALL
                .iter()
                .map(|p| (*p, SessionInfo::default()))
                .collect(),
            last_sync_status: None,
            last_heartbeat: None,
        }
    }
}

impl AgentState {
    /// 补齐缺失的平台条目（旧记录可能不含新增平台）
    pub fn fill_missing_platforms(&mut self) {
        for platform in Platform::ALL {
            self.sessions.entry(platform).or_default();
        }
    }
}
