//! agent 监听器回调接口

use crate::agent::platform::Platform;
use async_trait::async_trait;

/// agent 事件监听器（由调用方注册）
#[async_trait]
pub trait AgentListener: Send + Sync {
    /// 连接模式发生变化
    async fn on_mode_changed(&self, connected: bool);

    /// 某个平台的会话检查完成
    async fn on_session_changed(&self, platform: Platform, valid: bool);

    /// 同步进度更新，参数为 CollectionRun 快照的 JSON 字符串
    async fn on_sync_progress(&self, run_json: String);
}

/// 空实现（默认监听器）
pub struct EmptyAgentListener;

#[async_trait]
impl AgentListener for EmptyAgentListener {
    async fn on_mode_changed(&self, _connected: bool) {}
    async fn on_session_changed(&self, _platform: Platform, _valid: bool) {}
    async fn on_sync_progress(&self, _run_json: String) {}
}
