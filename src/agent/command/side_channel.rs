//! 旁路命令通道
//!
//! 命令以 base64(JSON) 形式附在 URL 片段标记之后。承载 URL 的载体
//! （浏览器里是临时标签页，这里是收件目录中的文件）在读取后立即销毁，
//! 无论命令最终是否通过校验。

use crate::agent::command::models::{Command, CommandRejection};
use crate::agent::serialization::{decode_token, extract_token};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 旁路命令载体
#[async_trait]
pub trait SideChannelCarrier: Send + Sync {
    /// 取出承载的 URL，并立即销毁载体（只能成功取出一次）
    async fn take(&self) -> Result<String>;
}

/// 从 URL 解码旁路命令
pub fn decode_side_channel(url: &str) -> Result<Command, CommandRejection> {
    let token = extract_token(url)
        .ok_or_else(|| CommandRejection::Malformed("URL 中没有命令标记".into()))?;
    let bytes =
        decode_token(token).map_err(|e| CommandRejection::Malformed(format!("{:#}", e)))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| CommandRejection::Malformed(format!("命令不是合法 JSON: {}", e)))?;
    Command::from_untrusted(value)
}

/// 收件目录中的一个命令文件，内容为一行 URL
pub struct InboxCarrier {
    path: PathBuf,
}

impl InboxCarrier {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 列出收件目录中的命令文件（按文件名排序，忽略隐藏文件与子目录）
    pub async fn scan(dir: &Path) -> Result<Vec<InboxCarrier>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .context(format!("读取收件目录失败: {}", dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if file_type.is_file() && !hidden {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths.into_iter().map(InboxCarrier::new).collect())
    }
}

#[async_trait]
impl SideChannelCarrier for InboxCarrier {
    async fn take(&self) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.path).await;

        // 读取成功与否都先删除载体
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(
                "[Command] ⚠️ 删除旁路命令文件失败: {}: {}",
                self.path.display(),
                e
            );
        } else {
            debug!("[Command] 🗑️ 已删除旁路命令文件: {}", self.path.display());
        }

        let content =
            content.context(format!("读取旁路命令文件失败: {}", self.path.display()))?;
        Ok(content.trim().to_string())
    }
}
