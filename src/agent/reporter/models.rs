//! 上报相关的数据结构

use crate::agent::collection::models::CollectionRun;
use crate::agent::platform::ConversationBatch;
use anyhow::{bail, Result};
use serde::Serialize;

/// 待投递条目保留时长（毫秒）
pub const PENDING_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// 待投递条目类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    Conversations,
    Progress,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Conversations => "conversations",
            PendingKind::Progress => "progress",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "conversations" => Ok(PendingKind::Conversations),
            "progress" => Ok(PendingKind::Progress),
            other => bail!("未知的待投递类别: {}", other),
        }
    }

    /// 每个类别最多保留的条目数
    pub fn capacity(&self) -> i64 {
        match self {
            PendingKind::Conversations => 100,
            PendingKind::Progress => 50,
        }
    }
}

/// 需要上报给后端的内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReportPayload {
    Conversations(ConversationBatch),
    Progress(CollectionRun),
}

impl ReportPayload {
    pub fn kind(&self) -> PendingKind {
        match self {
            ReportPayload::Conversations(_) => PendingKind::Conversations,
            ReportPayload::Progress(_) => PendingKind::Progress,
        }
    }

    /// 按类别解析持久化的 JSON
    pub fn from_stored(kind: PendingKind, payload: &str) -> Result<Self> {
        Ok(match kind {
            PendingKind::Conversations => {
                ReportPayload::Conversations(serde_json::from_str(payload)?)
            }
            PendingKind::Progress => ReportPayload::Progress(serde_json::from_str(payload)?),
        })
    }
}

/// 本地队列中的一条待投递记录
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub id: i64,
    pub kind: PendingKind,
    pub payload: String,
    pub created_at: i64,
}

/// 单次上报的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    Queued,
    /// 投递与入队都失败，数据丢弃
    Dropped,
}

/// 补发结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub delivered: usize,
    pub remaining: usize,
}
