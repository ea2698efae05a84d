//! 后端 API DTO（请求和响应结构体）

use crate::agent::platform::Platform;
use crate::agent::state::SessionInfo;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// 心跳请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReq {
    pub timestamp: i64,
    pub status: String,
    pub sessions: BTreeMap<Platform, SessionInfo>,
    pub version: String,
}

/// 会话状态上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdateReq {
    pub platform: Platform,
    pub valid: bool,
}

/// 轮询下一条命令的响应，`type` 为 `none` 表示暂无命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextCommandResp {
    #[serde(rename = "type", default = "none_type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

fn none_type() -> String {
    "none".to_string()
}

impl NextCommandResp {
    pub fn none() -> Self {
        Self {
            kind: none_type(),
            id: None,
            data: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind.is_empty() || self.kind == "none"
    }
}

/// 读取响应 body 并检查 HTTP 状态，返回原始 body
async fn read_checked_body(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<(Vec<u8>, String)> {
    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes).into_owned();
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    Ok((body_bytes.to_vec(), body_str))
}

/// 通用 HTTP 响应处理函数：检查状态并反序列化 body
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    let (body_bytes, body_str) = read_checked_body(response, operation_name).await?;

    // 从 bytes 反序列化（因为 body 已经被消费了）
    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}

/// 只关心是否成功的请求（body 内容忽略）
pub async fn ensure_success(response: reqwest::Response, operation_name: &str) -> anyhow::Result<()> {
    read_checked_body(response, operation_name).await.map(|_| ())
}
