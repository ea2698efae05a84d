//! 平台会话监控
//!
//! 维护每个平台的登录态缓存，并在连接时把结果上报后端

use crate::agent::backend::BackendApi;
use crate::agent::listener::AgentListener;
use crate::agent::platform::{Platform, PlatformRegistry};
use crate::agent::state::{SessionInfo, StateHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SessionMonitor {
    platforms: Arc<PlatformRegistry>,
    backend: Arc<dyn BackendApi>,
    state: StateHandle,
    listener: Arc<dyn AgentListener>,
}

impl SessionMonitor {
    pub fn new(
        platforms: Arc<PlatformRegistry>,
        backend: Arc<dyn BackendApi>,
        state: StateHandle,
        listener: Arc<dyn AgentListener>,
    ) -> Self {
        Self {
            platforms,
            backend,
            state,
            listener,
        }
    }

    /// 检查单个平台的登录态并记录；没有采集实现或检查出错都视为无效
    pub async fn check(&self, platform: Platform) -> bool {
        let valid = match self.platforms.get(platform) {
            Some(collector) => match collector.check_session().await {
                Ok(valid) => valid,
                Err(e) => {
                    warn!("[Session] ⚠️ {} 会话检查出错，按无效处理: {:#}", platform, e);
                    false
                }
            },
            None => {
                debug!("[Session] {} 未注册采集器，按无效处理", platform);
                false
            }
        };
        self.record(platform, valid).await;
        valid
    }

    /// 记录检查结果（后写覆盖先写），连接时上报后端
    pub async fn record(&self, platform: Platform, valid: bool) {
        let info = SessionInfo {
            valid,
            last_checked: self.state.now_ms(),
        };
        self.state.set_session(platform, info);
        self.state.persist().await;
        info!(
            "[Session] {} {} 会话状态: {}",
            if valid { "✅" } else { "❌" },
            platform,
            if valid { "有效" } else { "无效" }
        );
        self.listener.on_session_changed(platform, valid).await;

        if self.state.is_connected() {
            if let Err(e) = self.backend.update_session(platform, valid).await {
                // 上报失败不重试，下次检查或重连时会再次上报
                debug!("[Session] {} 会话上报失败: {:#}", platform, e);
            }
        }
    }

    /// 检查所有平台；非强制时跳过最近 `minCheckGap` 秒内检查过的平台
    pub async fn check_all(&self, force: bool) -> BTreeMap<Platform, SessionInfo> {
        let gap_ms = (self.state.settings().min_check_gap as i64).saturating_mul(1000);
        for platform in Platform::ALL {
            let last = self.state.session(platform).last_checked;
            let fresh = last > 0 && self.state.now_ms() - last < gap_ms;
            if !force && fresh {
                debug!("[Session] {} 最近已检查，跳过", platform);
                continue;
            }
            self.check(platform).await;
        }
        self.state.snapshot().sessions
    }

    /// 把缓存的所有平台会话上报后端（不重新检查）
    pub async fn report_all(&self) {
        let sessions = self.state.snapshot().sessions;
        info!("[Session] 📤 上报全部平台会话状态，共 {} 个", sessions.len());
        for (platform, info) in sessions {
            if let Err(e) = self.backend.update_session(platform, info.valid).await {
                warn!("[Session] ⚠️ {} 会话上报失败: {:#}", platform, e);
            }
        }
    }
}
