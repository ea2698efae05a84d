//! 后端 HTTP API 客户端
//!
//! 负责 agent 与后端之间的所有 HTTP 请求

use crate::agent::backend::types::{
    ensure_success, handle_http_response, HeartbeatReq, NextCommandResp, SessionUpdateReq,
};
use crate::agent::collection::models::CollectionRun;
use crate::agent::config::{AgentConfig, SettingsPatch};
use crate::agent::platform::{ConversationBatch, Platform};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// agent 依赖的后端接口，测试中可替换为假实现
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// 存活探测（短超时）
    async fn check_status(&self) -> Result<()>;

    async fn send_heartbeat(&self, req: &HeartbeatReq) -> Result<()>;

    /// 拉取下一条待执行命令
    async fn next_command(&self) -> Result<NextCommandResp>;

    /// 回传命令执行结果
    async fn post_command_response(&self, command_id: &str, payload: &serde_json::Value)
        -> Result<()>;

    async fn fetch_settings(&self) -> Result<SettingsPatch>;

    async fn update_session(&self, platform: Platform, valid: bool) -> Result<()>;

    async fn post_sync_progress(&self, run: &CollectionRun) -> Result<()>;

    async fn save_conversations(&self, batch: &ConversationBatch) -> Result<()>;
}

/// 基于 reqwest 的后端客户端
pub struct HttpBackendApi {
    client: reqwest::Client,
    api_base_url: String,
    probe_timeout: Duration,
}

impl HttpBackendApi {
    /// 创建新的后端 API 客户端
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout)
            .user_agent(format!("argosa-agent/{}", config.version))
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::with_client(
            client,
            config.api_base_url.clone(),
            config.probe_timeout,
        ))
    }

    /// 使用外部配置好的 HTTP 客户端
    pub fn with_client(client: reqwest::Client, api_base_url: String, probe_timeout: Duration) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            probe_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// 命令回执地址；命令 id 来自后端，作为单个路径段做百分号编码
    fn command_response_url(&self, command_id: &str) -> Result<reqwest::Url> {
        // `.` 与 `..` 会被当成路径导航而被丢弃
        if matches!(command_id, "" | "." | "..") {
            return Err(anyhow!("命令 id 非法: {:?}", command_id));
        }
        let mut url = reqwest::Url::parse(&self.api_base_url)
            .context(format!("后端地址非法: {}", self.api_base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("后端地址不能作为路径前缀: {}", self.api_base_url))?
            .pop_if_empty()
            .extend(["commands", command_id, "response"]);
        Ok(url)
    }

    async fn post_json<T: serde::Serialize + ?Sized + Sync>(
        &self,
        path: &str,
        body: &T,
        operation_name: &str,
    ) -> Result<()> {
        self.post_json_to(self.url(path), body, operation_name)
            .await
    }

    async fn post_json_to<T: serde::Serialize + ?Sized + Sync>(
        &self,
        url: String,
        body: &T,
        operation_name: &str,
    ) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        debug!("[Backend]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(body)
            .send()
            .await
            .context("请求失败")?;

        ensure_success(response, operation_name).await
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn check_status(&self) -> Result<()> {
        let url = self.url("/status");
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .context("后端探测失败")?;
        ensure_success(response, "存活探测").await
    }

    async fn send_heartbeat(&self, req: &HeartbeatReq) -> Result<()> {
        debug!("[Backend] 💓 发送心跳");
        self.post_json("/heartbeat", req, "心跳").await
    }

    async fn next_command(&self) -> Result<NextCommandResp> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("/commands/next");

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let resp: NextCommandResp = handle_http_response(response, "拉取命令").await?;
        if !resp.is_none() {
            info!(
                "[Backend] 📥 收到后端命令: type={}, id={:?}",
                resp.kind, resp.id
            );
        }
        Ok(resp)
    }

    async fn post_command_response(
        &self,
        command_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let url = self.command_response_url(command_id)?;
        self.post_json_to(url.to_string(), payload, "命令回执").await
    }

    async fn fetch_settings(&self) -> Result<SettingsPatch> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("/settings");
        info!("[Backend] 📡 拉取设置");

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let value: serde_json::Value = handle_http_response(response, "拉取设置").await?;
        SettingsPatch::from_command_data(&value)
    }

    async fn update_session(&self, platform: Platform, valid: bool) -> Result<()> {
        let req = SessionUpdateReq { platform, valid };
        self.post_json("/session/update", &req, "会话上报").await
    }

    async fn post_sync_progress(&self, run: &CollectionRun) -> Result<()> {
        self.post_json("/sync/progress", run, "同步进度上报").await
    }

    async fn save_conversations(&self, batch: &ConversationBatch) -> Result<()> {
        info!(
            "[Backend] 📤 上传对话: platform={}, 条数={}",
            batch.platform,
            batch.conversations.len()
        );
        self.post_json("/conversations/save", batch, "对话保存").await
    }
}
