//! agent 配置
//!
//! - [`AgentConfig`]：进程启动时确定、运行期间不变的配置
//! - [`Settings`]：可由后端或命令在线修改并持久化的设置

use crate::agent::platform::Platform;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// agent 启动配置
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// 后端 HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://argosa-agent.db?mode=rwc`
    pub db_url: String,
    /// 上报给后端的 agent 版本号
    pub version: String,
    /// 后端存活探测的超时时间
    pub probe_timeout: Duration,
    /// 其余后端请求的超时时间
    pub request_timeout: Duration,
    /// 轮询后端命令的间隔
    pub command_poll_interval: Duration,
    /// 待投递队列清理的间隔
    pub pending_sweep_interval: Duration,
    /// 自动采集的周期
    pub auto_collect_interval: Duration,
    /// 自动采集覆盖的平台
    pub auto_collect_platforms: Vec<Platform>,
    /// 旁路命令收件目录（为空则不启用）
    pub inbox_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// 创建默认配置
    pub fn new(api_base_url: String, db_url: String) -> Self {
        Self {
            api_base_url,
            db_url,
            version: env!("CARGO_PKG_VERSION").to_string(),
            probe_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(15),
            command_poll_interval: Duration::from_secs(5),
            pending_sweep_interval: Duration::from_secs(60 * 60),
            auto_collect_interval: Duration::from_secs(3 * 24 * 60 * 60),
            auto_collect_platforms: vec![Platform::ChatGpt, Platform::Claude, Platform::Gemini],
            inbox_dir: None,
        }
    }
}

/// 可在线修改的设置（字段名与后端保持 camelCase）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// 每个平台最多采集的对话数
    pub max_conversations: u32,
    /// 平台之间的基础等待（秒）
    pub random_delay: u64,
    /// 两次会话检查之间的最小间隔（秒）
    pub min_check_gap: u64,
    /// 心跳间隔（秒）
    pub heartbeat_interval: u64,
    /// 后端存活探测间隔（秒）
    pub backend_check_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_conversations: 20,
            random_delay: 5,
            min_check_gap: 300,
            heartbeat_interval: 30,
            backend_check_interval: 10,
        }
    }
}

impl Settings {
    /// 合并补丁；任一字段越界则整体拒绝，原设置不变
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Settings> {
        patch.validate()?;
        let mut next = self.clone();
        if let Some(v) = patch.max_conversations {
            next.max_conversations = v;
        }
        if let Some(v) = patch.random_delay {
            next.random_delay = v;
        }
        if let Some(v) = patch.min_check_gap {
            next.min_check_gap = v;
        }
        if let Some(v) = patch.heartbeat_interval {
            next.heartbeat_interval = v;
        }
        if let Some(v) = patch.backend_check_interval {
            next.backend_check_interval = v;
        }
        Ok(next)
    }

    pub fn heartbeat_every(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn backend_check_every(&self) -> Duration {
        Duration::from_secs(self.backend_check_interval)
    }
}

/// 设置补丁：只包含需要修改的字段，未知字段忽略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conversations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_check_gap: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_check_interval: Option<u64>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }

    /// 从命令 data 中解析补丁，兼容 `{...}` 与 `{"settings": {...}}` 两种形式
    pub fn from_command_data(data: &serde_json::Value) -> Result<SettingsPatch> {
        let source = data.get("settings").unwrap_or(data);
        if source.is_null() {
            return Ok(SettingsPatch::default());
        }
        if !source.is_object() {
            bail!("settings 必须是 JSON 对象");
        }
        Ok(serde_json::from_value(source.clone())?)
    }

    fn validate(&self) -> Result<()> {
        check_range("maxConversations", self.max_conversations.map(u64::from), 1, 500)?;
        check_range("randomDelay", self.random_delay, 0, 300)?;
        check_range("minCheckGap", self.min_check_gap, 0, 86_400)?;
        check_range("heartbeatInterval", self.heartbeat_interval, 5, 3_600)?;
        check_range("backendCheckInterval", self.backend_check_interval, 2, 3_600)?;
        Ok(())
    }
}

fn check_range(name: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    match value {
        Some(v) if v < min || v > max => {
            bail!("设置 {} 超出范围: {} (允许 {}..={})", name, v, min, max)
        }
        _ => Ok(()),
    }
}
