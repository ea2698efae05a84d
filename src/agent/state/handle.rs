//! 共享状态句柄
//!
//! 所有组件通过同一个 [`StateHandle`] 读写模式、会话与设置。
//! 锁只在同步代码中短暂持有，不跨越 `.await`。

use crate::agent::collection::models::RunStatus;
use crate::agent::config::{Settings, SettingsPatch};
use crate::agent::env::Clock;
use crate::agent::platform::Platform;
use crate::agent::state::dao::StateDao;
use crate::agent::state::models::{AgentMode, AgentState, SessionInfo};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct StateHandle {
    state: Arc<Mutex<AgentState>>,
    settings: Arc<Mutex<Settings>>,
    dao: Arc<StateDao>,
    clock: Arc<dyn Clock>,
}

impl StateHandle {
    /// 从数据库加载状态与设置；模式总是从 standalone 开始，由首次探测决定是否连接
    pub async fn load(dao: StateDao, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut state = match dao.load_state().await? {
            Some((state, saved_at)) => {
                info!("[Store] 📂 已加载持久化状态 (saved_at={})", saved_at);
                state
            }
            None => {
                info!("[Store] 🆕 未找到持久化状态，使用默认状态");
                AgentState::default()
            }
        };
        state.mode = AgentMode::Standalone;
        state.fill_missing_platforms();

        let settings = dao.load_settings().await?.unwrap_or_default();

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            settings: Arc::new(Mutex::new(settings)),
            dao: Arc::new(dao),
            clock,
        })
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn mode(&self) -> AgentMode {
        self.state.lock().mode
    }

    pub fn is_connected(&self) -> bool {
        self.mode().is_connected()
    }

    /// 设置模式，返回是否发生了变化
    pub fn set_mode(&self, mode: AgentMode) -> bool {
        let mut state = self.state.lock();
        let changed = state.mode != mode;
        state.mode = mode;
        changed
    }

    pub fn session(&self, platform: Platform) -> SessionInfo {
        self.state
            .lock()
            .sessions
            .get(&platform)
            .copied()
            .unwrap_or_default()
    }

    /// 覆盖平台会话信息（后写覆盖先写）
    pub fn set_session(&self, platform: Platform, info: SessionInfo) {
        self.state.lock().sessions.insert(platform, info);
    }

    pub fn set_last_sync_status(&self, status: RunStatus) {
        self.state.lock().last_sync_status = Some(status);
    }

    pub fn set_last_heartbeat(&self, at: i64) {
        self.state.lock().last_heartbeat = Some(at);
    }

    pub fn snapshot(&self) -> AgentState {
        self.state.lock().clone()
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// 合并设置补丁并落盘，返回合并后的设置
    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<Settings> {
        let merged = {
            let mut settings = self.settings.lock();
            let merged = settings.merged(patch)?;
            *settings = merged.clone();
            merged
        };
        self.dao.save_settings(&merged, self.now_ms()).await?;
        info!("[Store] ⚙️ 设置已更新: {:?}", merged);
        Ok(merged)
    }

    /// 保存当前状态；失败只记录日志
    pub async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.dao.save_state(&snapshot, self.now_ms()).await {
            error!("[Store] ❌ 保存状态失败: {:?}", e);
        }
    }
}
