//! 命令校验与去重

use crate::agent::command::models::{Command, CommandRejection, COMMAND_VALIDITY_MS};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// 去重集合超过该数量时触发清理
pub const DEDUP_CAPACITY: usize = 1000;
/// 清理后保留的最近条目数
pub const DEDUP_RETAIN: usize = 100;

/// 最近处理过的命令集合（按插入顺序淘汰）
#[derive(Debug, Default)]
pub struct CommandDeduper {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl CommandDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// 校验命令：过期检查先于去重检查；通过后记录去重键
    pub fn validate(&mut self, command: &Command, now_ms: i64) -> Result<(), CommandRejection> {
        // 时间戳来自不可信输入，差值按饱和运算计算
        let age_ms = now_ms.saturating_sub(command.timestamp);
        if age_ms > COMMAND_VALIDITY_MS {
            return Err(CommandRejection::Expired { age_ms });
        }
        let ahead_ms = age_ms.saturating_neg();
        if ahead_ms > COMMAND_VALIDITY_MS {
            return Err(CommandRejection::FromFuture { ahead_ms });
        }

        let key = command.dedup_key();
        if self.seen.contains(&key) {
            return Err(CommandRejection::Duplicate { key });
        }
        self.remember(key);
        Ok(())
    }

    fn remember(&mut self, key: String) {
        self.seen.insert(key.clone());
        self.order.push_back(key);

        if self.order.len() > DEDUP_CAPACITY {
            let drop_count = self.order.len() - DEDUP_RETAIN;
            for old in self.order.drain(..drop_count) {
                self.seen.remove(&old);
            }
            debug!(
                "[Command] 🧹 去重集合清理完成，保留最近 {} 条",
                self.order.len()
            );
        }
    }
}
