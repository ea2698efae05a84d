//! 平台采集能力接口
//!
//! 协调器只依赖这里的 trait；具体平台如何打开页面、如何判断登录态、
//! 如何列出对话都由实现方负责。

use crate::agent::platform::models::{ConversationSummary, Platform};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 单个平台的采集能力
#[async_trait]
pub trait PlatformCollector: Send + Sync {
    /// 该实现对应的平台
    fn platform(&self) -> Platform;

    /// 检查当前登录态是否有效
    async fn check_session(&self) -> Result<bool>;

    /// 列出最近的对话，最多 `limit` 条
    async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>>;
}

/// 平台 -> 采集实现 的注册表
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    collectors: HashMap<Platform, Arc<dyn PlatformCollector>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册采集实现，同一平台后注册的覆盖先注册的
    pub fn register(&mut self, collector: Arc<dyn PlatformCollector>) {
        let platform = collector.platform();
        debug!("[Platform] 注册采集器: {}", platform);
        self.collectors.insert(platform, collector);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformCollector>> {
        self.collectors.get(&platform).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// 已注册的平台（按固定顺序）
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .iter()
            .copied()
            .filter(|p| self.collectors.contains_key(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::FakeCollector;

    #[test]
    fn platforms_follow_fixed_order() {
        let mut registry = PlatformRegistry::new();
        assert!(registry.is_empty());

        registry.register(FakeCollector::new(Platform::Grok));
        registry.register(FakeCollector::new(Platform::ChatGpt));
        registry.register(FakeCollector::new(Platform::Gemini));
        assert_eq!(
            registry.platforms(),
            vec![Platform::ChatGpt, Platform::Gemini, Platform::Grok]
        );
        assert!(registry.get(Platform::Claude).is_none());
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let first = FakeCollector::new(Platform::Claude);
        let second = FakeCollector::new(Platform::Claude);
        second.set_session_valid(false);

        let mut registry = PlatformRegistry::new();
        registry.register(first.clone());
        registry.register(second.clone());
        assert_eq!(registry.platforms(), vec![Platform::Claude]);

        let collector = registry.get(Platform::Claude).expect("registered");
        assert!(!collector.check_session().await.unwrap());
        assert_eq!(first.session_checks(), 0);
        assert_eq!(second.session_checks(), 1);
    }
}
