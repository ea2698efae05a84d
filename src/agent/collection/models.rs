//! 采集任务数据结构

use crate::agent::config::{Settings, SettingsPatch};
use crate::agent::platform::Platform;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// 采集任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Starting,
    Collecting,
    Completed,
    Error,
}

/// 一次采集任务的进度快照（原样上报给后端）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub sync_id: String,
    pub platforms: Vec<Platform>,
    pub settings: Settings,
    /// 0..=100
    pub progress: u8,
    pub status: RunStatus,
    pub collected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CollectionRun {
    pub fn new(request: &SyncRequest) -> Self {
        Self {
            sync_id: request.sync_id.clone(),
            platforms: request.platforms.clone(),
            settings: request.settings.clone(),
            progress: 0,
            status: RunStatus::Starting,
            collected: 0,
            current_platform: None,
            message: None,
        }
    }
}

/// 采集请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub sync_id: String,
    pub platforms: Vec<Platform>,
    /// 本次任务生效的设置（在线设置 + 命令中携带的覆盖项）
    pub settings: Settings,
}

impl SyncRequest {
    pub fn new(sync_id: impl Into<String>, platforms: Vec<Platform>, settings: Settings) -> Self {
        Self {
            sync_id: sync_id.into(),
            platforms,
            settings,
        }
    }

    /// 从 sync 命令的 data 构建请求：`{platforms: [...], settings?: {...}}`
    pub fn from_command_data(
        sync_id: String,
        data: &serde_json::Value,
        base: &Settings,
    ) -> Result<SyncRequest> {
        let names: Vec<String> = match data.get("platforms") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => bail!("sync 命令缺少 platforms"),
        };
        if names.is_empty() {
            bail!("sync 命令的 platforms 为空");
        }
        if names.len() > Platform::ALL.len() * 2 {
            bail!("sync 命令的 platforms 过多: {}", names.len());
        }
        let platforms = Platform::parse_list(&names)?;

        let settings = match data.get("settings") {
            Some(value) if !value.is_null() => {
                let patch = SettingsPatch::from_command_data(value)?;
                base.merged(&patch)?
            }
            _ => base.clone(),
        };

        Ok(SyncRequest::new(sync_id, platforms, settings))
    }
}

/// 第 `index` 个平台开始时的进度百分比（四舍五入）
pub fn progress_for(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((index as f64 / total as f64) * 100.0).round().min(100.0) as u8
}
