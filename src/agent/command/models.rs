//! 命令数据结构

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 命令有效期（毫秒）
pub const COMMAND_VALIDITY_MS: i64 = 5 * 60 * 1000;

const MAX_ACTION_LEN: usize = 64;
const MAX_SYNC_ID_LEN: usize = 128;

/// 一条待执行的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    /// 命令生成时间（毫秒）
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// 已识别的命令类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    Sync,
    CheckSession,
    UpdateSettings,
    Unknown(String),
}

impl Command {
    pub fn new(action: impl Into<String>, timestamp: i64) -> Self {
        Self {
            action: action.into(),
            timestamp,
            sync_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_sync_id(mut self, sync_id: impl Into<String>) -> Self {
        self.sync_id = Some(sync_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> CommandAction {
        match self.action.as_str() {
            "sync" => CommandAction::Sync,
            "check_session" => CommandAction::CheckSession,
            "update_settings" => CommandAction::UpdateSettings,
            other => CommandAction::Unknown(other.to_string()),
        }
    }

    /// 去重键：`action:sync_id`，没有 sync_id 时使用时间戳
    pub fn dedup_key(&self) -> String {
        match &self.sync_id {
            Some(sync_id) => format!("{}:{}", self.action, sync_id),
            None => format!("{}:{}", self.action, self.timestamp),
        }
    }

    /// 从不可信的 JSON 中解析命令，并检查形状与长度
    pub fn from_untrusted(value: serde_json::Value) -> Result<Command, CommandRejection> {
        if !value.is_object() {
            return Err(CommandRejection::Malformed("命令必须是 JSON 对象".into()));
        }
        let command: Command = serde_json::from_value(value)
            .map_err(|e| CommandRejection::Malformed(format!("命令字段非法: {}", e)))?;

        if command.action.is_empty() || command.action.len() > MAX_ACTION_LEN {
            return Err(CommandRejection::Malformed("action 为空或过长".into()));
        }
        if !command
            .action
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CommandRejection::Malformed("action 含非法字符".into()));
        }
        if let Some(sync_id) = &command.sync_id {
            if sync_id.is_empty() || sync_id.len() > MAX_SYNC_ID_LEN {
                return Err(CommandRejection::Malformed("sync_id 为空或过长".into()));
            }
        }
        if !(command.data.is_null() || command.data.is_object()) {
            return Err(CommandRejection::Malformed("data 必须是 JSON 对象".into()));
        }
        Ok(command)
    }
}

/// 命令被拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejection {
    #[error("命令已过期 ({age_ms} ms)")]
    Expired { age_ms: i64 },
    #[error("命令时间戳在未来 ({ahead_ms} ms)")]
    FromFuture { ahead_ms: i64 },
    #[error("重复命令: {key}")]
    Duplicate { key: String },
    #[error("命令格式错误: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedup_key_prefers_sync_id() {
        let cmd = Command::new("sync", 100).with_sync_id("s-1");
        assert_eq!(cmd.dedup_key(), "sync:s-1");
        assert_eq!(Command::new("check_session", 100).dedup_key(), "check_session:100");
    }

    #[test]
    fn untrusted_payload_shape_is_checked() {
        let ok = Command::from_untrusted(json!({
            "action": "sync",
            "timestamp": 1,
            "sync_id": "abc",
            "data": { "platforms": ["claude"] }
        }))
        .unwrap();
        assert_eq!(ok.kind(), CommandAction::Sync);

        for bad in [
            json!("sync"),
            json!({ "timestamp": 1 }),
            json!({ "action": "", "timestamp": 1 }),
            json!({ "action": "sync", "timestamp": "yesterday" }),
            json!({ "action": "sync;rm", "timestamp": 1 }),
            json!({ "action": "sync", "timestamp": 1, "data": [1, 2] }),
            json!({ "action": "sync", "timestamp": 1, "sync_id": "" }),
        ] {
            assert!(
                matches!(Command::from_untrusted(bad.clone()), Err(CommandRejection::Malformed(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn unknown_action_is_preserved() {
        let cmd = Command::new("reboot", 0);
        assert_eq!(cmd.kind(), CommandAction::Unknown("reboot".into()));
    }
}
