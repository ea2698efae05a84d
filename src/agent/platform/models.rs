//! 平台相关的数据模型

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 受支持的对话平台（固定集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Claude,
    Gemini,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Grok,
    Perplexity,
}

impl Platform {
    /// 所有已知平台，顺序即会话上报顺序
    pub const ALL: [Platform; 6] = [
        Platform::ChatGpt,
        Platform::Claude,
        Platform::Gemini,
        Platform::DeepSeek,
        Platform::Grok,
        Platform::Perplexity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
            Platform::DeepSeek => "deepseek",
            Platform::Grok => "grok",
            Platform::Perplexity => "perplexity",
        }
    }

    /// 解析平台列表，去重并保持原顺序；遇到未知平台直接报错
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Platform>> {
        let mut platforms = Vec::with_capacity(names.len());
        for name in names {
            let platform: Platform = name.as_ref().parse()?;
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }
        Ok(platforms)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        match Platform::ALL.iter().find(|p| p.as_str() == normalized) {
            Some(platform) => Ok(*platform),
            None => bail!("未知平台: {}", s),
        }
    }
}

/// 平台返回的对话摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// 一次保存请求：某个平台采集到的对话列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationBatch {
    pub platform: Platform,
    pub conversations: Vec<ConversationSummary>,
    /// 采集时间（毫秒）
    pub timestamp: i64,
}
