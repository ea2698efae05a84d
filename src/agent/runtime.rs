//! agent 运行时
//!
//! [`Agent`] 持有所有组件，[`AgentBuilder`] 负责注入依赖，
//! [`Agent::start`] 启动各个定时任务并返回可关闭的 [`AgentHandle`]。

use crate::agent::backend::{BackendApi, HeartbeatReq, HttpBackendApi, NextCommandResp};
use crate::agent::collection::{CollectionCoordinator, CollectionRun, SyncRequest};
use crate::agent::command::{
    decode_side_channel, Command, CommandAction, CommandDeduper, CommandRejection, InboxCarrier,
    SideChannelCarrier,
};
use crate::agent::config::{AgentConfig, Settings, SettingsPatch};
use crate::agent::db::create_sqlite_pool_with_migration;
use crate::agent::env::{Clock, Jitter, SystemClock, ThreadRngJitter};
use crate::agent::listener::{AgentListener, EmptyAgentListener};
use crate::agent::platform::{Platform, PlatformCollector, PlatformRegistry};
use crate::agent::reporter::{PendingDao, Reporter};
use crate::agent::session::SessionMonitor;
use crate::agent::state::{AgentMode, StateDao, StateHandle};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::json;
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 收件目录的扫描间隔
const INBOX_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// 命令分发的结果
pub enum DispatchOutcome {
    /// 采集任务已在后台启动
    SyncStarted(JoinHandle<CollectionRun>),
    /// 已有任务在运行，本次忽略
    SyncSkipped,
    SessionChecked { platform: Platform, valid: bool },
    SettingsUpdated(Settings),
    /// 命令内容无效，记录日志后丢弃
    Invalid(String),
    /// 未知命令，记录日志后丢弃
    Ignored,
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::SyncStarted(_) => f.write_str("SyncStarted"),
            DispatchOutcome::SyncSkipped => f.write_str("SyncSkipped"),
            DispatchOutcome::SessionChecked { platform, valid } => f
                .debug_struct("SessionChecked")
                .field("platform", platform)
                .field("valid", valid)
                .finish(),
            DispatchOutcome::SettingsUpdated(s) => f.debug_tuple("SettingsUpdated").field(s).finish(),
            DispatchOutcome::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
            DispatchOutcome::Ignored => f.write_str("Ignored"),
        }
    }
}

/// agent 构建器
pub struct AgentBuilder {
    config: AgentConfig,
    backend: Option<Arc<dyn BackendApi>>,
    pool: Option<Pool<Sqlite>>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn Jitter>,
    platforms: PlatformRegistry,
    listener: Arc<dyn AgentListener>,
}

impl AgentBuilder {
    fn new(config: AgentConfig) -> Self {
        Self {
            config,
            backend: None,
            pool: None,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(ThreadRngJitter),
            platforms: PlatformRegistry::new(),
            listener: Arc::new(EmptyAgentListener),
        }
    }

    /// 替换后端实现（默认使用 HTTP 客户端）
    pub fn backend(mut self, backend: Arc<dyn BackendApi>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 使用已有的连接池（默认按 `db_url` 创建并执行迁移）
    pub fn pool(mut self, pool: Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn collector(mut self, collector: Arc<dyn PlatformCollector>) -> Self {
        self.platforms.register(collector);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn AgentListener>) -> Self {
        self.listener = listener;
        self
    }

    /// 加载持久化状态并组装所有组件
    pub async fn build(self) -> Result<Arc<Agent>> {
        let backend: Arc<dyn BackendApi> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackendApi::new(&self.config)?),
        };
        let pool = match self.pool {
            Some(pool) => pool,
            None => create_sqlite_pool_with_migration(&self.config.db_url).await?,
        };

        if self.platforms.is_empty() {
            warn!("[Agent] ⚠️ 没有注册任何平台采集器，所有平台都将按会话无效处理");
        } else {
            info!("[Agent] 🧩 已注册采集器: {:?}", self.platforms.platforms());
        }
        let platforms = Arc::new(self.platforms);

        let state = StateHandle::load(StateDao::new(pool.clone()), self.clock).await?;
        let reporter = Arc::new(Reporter::new(
            backend.clone(),
            PendingDao::new(pool),
            state.clone(),
        ));
        let sessions = Arc::new(SessionMonitor::new(
            platforms.clone(),
            backend.clone(),
            state.clone(),
            self.listener.clone(),
        ));
        let coordinator = Arc::new(CollectionCoordinator::new(
            platforms,
            sessions.clone(),
            reporter.clone(),
            state.clone(),
            self.jitter,
            self.listener.clone(),
        ));

        info!(
            "[Agent] ✅ agent 构建完成 (version={}, backend={})",
            self.config.version, self.config.api_base_url
        );
        Ok(Arc::new(Agent {
            config: self.config,
            backend,
            state,
            sessions,
            reporter,
            coordinator,
            listener: self.listener,
            deduper: Mutex::new(CommandDeduper::new()),
        }))
    }
}

/// 正在运行的 agent 的句柄
pub struct AgentHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// 停止所有定时任务并等待其退出
    pub async fn shutdown(self) {
        info!("[Agent] 🛑 正在停止 agent");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[Agent] 定时任务退出异常: {}", e);
            }
        }
        info!("[Agent] ✅ agent 已停止");
    }
}

pub struct Agent {
    config: AgentConfig,
    backend: Arc<dyn BackendApi>,
    state: StateHandle,
    sessions: Arc<SessionMonitor>,
    reporter: Arc<Reporter>,
    coordinator: Arc<CollectionCoordinator>,
    listener: Arc<dyn AgentListener>,
    deduper: Mutex<CommandDeduper>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn sessions(&self) -> &Arc<SessionMonitor> {
        &self.sessions
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn coordinator(&self) -> &Arc<CollectionCoordinator> {
        &self.coordinator
    }

    // ==================== 连接监控 ====================

    /// 探测后端并更新模式，返回探测后的模式
    pub async fn probe(&self) -> AgentMode {
        match self.backend.check_status().await {
            Ok(()) => {
                if self.state.set_mode(AgentMode::Connected) {
                    info!("[Agent] 🟢 后端可达，切换到 connected 模式");
                    self.state.persist().await;
                    self.listener.on_mode_changed(true).await;
                    self.resync().await;
                }
            }
            Err(e) => {
                if self.state.set_mode(AgentMode::Standalone) {
                    warn!("[Agent] 🔴 后端不可达，切换到 standalone 模式: {:#}", e);
                    self.state.persist().await;
                    self.listener.on_mode_changed(false).await;
                } else {
                    debug!("[Agent] 后端仍不可达: {:#}", e);
                }
            }
        }
        self.state.mode()
    }

    /// 重新连接后的同步：拉取设置 → 上报会话 → 补发本地队列
    async fn resync(&self) {
        info!("[Agent] 🔄 开始重连同步");
        if let Err(e) = self.pull_settings().await {
            warn!("[Agent] ⚠️ 拉取设置失败: {:#}", e);
        }
        self.sessions.report_all().await;
        if let Err(e) = self.reporter.flush().await {
            warn!("[Agent] ⚠️ 补发本地队列失败: {:#}", e);
        }
    }

    async fn pull_settings(&self) -> Result<()> {
        let patch = self.backend.fetch_settings().await?;
        if patch.is_empty() {
            debug!("[Agent] 后端没有下发设置");
            return Ok(());
        }
        self.state.update_settings(&patch).await?;
        Ok(())
    }

    // ==================== 心跳 ====================

    /// 发送一次心跳；仅在 connected 模式下发送
    pub async fn send_heartbeat(&self) -> Result<()> {
        if !self.state.is_connected() {
            return Ok(());
        }
        let now = self.state.now_ms();
        let req = HeartbeatReq {
            timestamp: now,
            status: "alive".to_string(),
            sessions: self.state.snapshot().sessions,
            version: self.config.version.clone(),
        };
        self.backend.send_heartbeat(&req).await?;
        self.state.set_last_heartbeat(now);
        self.state.persist().await;
        Ok(())
    }

    // ==================== 命令 ====================

    /// 检查命令的时效与是否重复；通过时记住其去重键
    pub fn validate(&self, command: &Command) -> Result<(), CommandRejection> {
        let now = self.state.now_ms();
        self.deduper.lock().validate(command, now)
    }

    /// 执行已通过校验的命令
    pub async fn dispatch(&self, command: Command) -> DispatchOutcome {
        match command.kind() {
            CommandAction::Sync => {
                let sync_id = command
                    .sync_id
                    .clone()
                    .unwrap_or_else(|| format!("sync-{}", command.timestamp));
                match SyncRequest::from_command_data(sync_id, &command.data, &self.state.settings()) {
                    Ok(request) => match self.coordinator.spawn(request) {
                        Some(handle) => DispatchOutcome::SyncStarted(handle),
                        None => DispatchOutcome::SyncSkipped,
                    },
                    Err(e) => invalid(&command, e),
                }
            }
            CommandAction::CheckSession => match platform_of(&command.data) {
                Ok(Some(platform)) => {
                    let valid = self.sessions.check(platform).await;
                    DispatchOutcome::SessionChecked { platform, valid }
                }
                Ok(None) => invalid(&command, anyhow!("check_session 缺少 platform")),
                Err(e) => invalid(&command, e),
            },
            CommandAction::UpdateSettings => {
                let result = match SettingsPatch::from_command_data(&command.data) {
                    Ok(patch) => self.state.update_settings(&patch).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(settings) => DispatchOutcome::SettingsUpdated(settings),
                    Err(e) => invalid(&command, e),
                }
            }
            CommandAction::Unknown(action) => {
                warn!("[Command] ⚠️ 未知命令，已丢弃: {}", action);
                DispatchOutcome::Ignored
            }
        }
    }

    /// 校验并执行命令；被拒绝时返回 None
    pub async fn handle_command(&self, command: Command) -> Option<DispatchOutcome> {
        if let Err(rejection) = self.validate(&command) {
            warn!(
                "[Command] 🚫 拒绝命令 {}: {}",
                command.action, rejection
            );
            return None;
        }
        info!(
            "[Command] ▶️ 执行命令: {} (sync_id={:?})",
            command.action, command.sync_id
        );
        Some(self.dispatch(command).await)
    }

    /// 消费一个旁路命令载体：先取出并销毁载体，再解码、校验、执行
    pub async fn consume_side_channel(
        &self,
        carrier: &dyn SideChannelCarrier,
    ) -> Option<DispatchOutcome> {
        let url = match carrier.take().await {
            Ok(url) => url,
            Err(e) => {
                warn!("[Command] ⚠️ 读取旁路命令失败: {:#}", e);
                return None;
            }
        };
        match decode_side_channel(&url) {
            Ok(command) => self.handle_command(command).await,
            Err(rejection) => {
                warn!("[Command] 🚫 旁路命令无效: {}", rejection);
                None
            }
        }
    }

    /// 轮询一次后端命令；仅在 connected 模式下执行
    pub async fn poll_backend_command(&self) -> Result<Option<DispatchOutcome>> {
        if !self.state.is_connected() {
            return Ok(None);
        }
        let resp = self.backend.next_command().await?;
        Ok(self.handle_backend_command(resp).await)
    }

    async fn handle_backend_command(&self, resp: NextCommandResp) -> Option<DispatchOutcome> {
        if resp.is_none() {
            return None;
        }
        let data = resp.data.clone().unwrap_or(serde_json::Value::Null);

        match resp.kind.as_str() {
            "check_session_now" => {
                let payload = match platform_of(&data) {
                    Ok(Some(platform)) => {
                        self.sessions.check(platform).await;
                        json!({ "id": resp.id, "success": true, "sessions": self.state.snapshot().sessions })
                    }
                    Ok(None) => {
                        let sessions = self.sessions.check_all(true).await;
                        json!({ "id": resp.id, "success": true, "sessions": sessions })
                    }
                    Err(e) => {
                        json!({ "id": resp.id, "success": false, "error": format!("{:#}", e) })
                    }
                };
                self.respond(&resp, payload).await;
                None
            }
            "cancel_sync" => {
                let cancelled = self.coordinator.cancel();
                let payload = json!({
                    "id": resp.id,
                    "success": true,
                    "cancelled": cancelled.is_some(),
                    "sync_id": cancelled,
                });
                self.respond(&resp, payload).await;
                None
            }
            _ => {
                let timestamp = data
                    .get("timestamp")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_else(|| self.state.now_ms());
                let raw = json!({
                    "action": resp.kind,
                    "timestamp": timestamp,
                    "sync_id": data.get("sync_id").cloned().unwrap_or(serde_json::Value::Null),
                    "data": data,
                });
                match Command::from_untrusted(raw) {
                    Ok(command) => self.handle_command(command).await,
                    Err(rejection) => {
                        warn!("[Command] 🚫 后端命令无效 ({}): {}", resp.kind, rejection);
                        None
                    }
                }
            }
        }
    }

    async fn respond(&self, resp: &NextCommandResp, payload: serde_json::Value) {
        let Some(id) = resp.id.as_deref() else {
            debug!("[Command] 命令 {} 没有 id，不回执", resp.kind);
            return;
        };
        if let Err(e) = self.backend.post_command_response(id, &payload).await {
            warn!("[Command] ⚠️ 命令回执失败 ({}): {:#}", id, e);
        }
    }

    /// 扫描收件目录并逐个消费其中的旁路命令
    pub async fn drain_inbox(&self, dir: &std::path::Path) -> Result<usize> {
        let carriers = InboxCarrier::scan(dir).await?;
        let count = carriers.len();
        for carrier in carriers {
            debug!("[Command] 📨 处理旁路命令文件: {}", carrier.path().display());
            self.consume_side_channel(&carrier).await;
        }
        Ok(count)
    }

    // ==================== 采集 ====================

    /// 按默认平台发起一次自动采集
    pub fn auto_collect(&self) -> Option<JoinHandle<CollectionRun>> {
        let sync_id = format!("auto-{}", self.state.now_ms());
        let request = SyncRequest::new(
            sync_id,
            self.config.auto_collect_platforms.clone(),
            self.state.settings(),
        );
        info!("[Agent] ⏰ 触发自动采集: {:?}", request.platforms);
        self.coordinator.spawn(request)
    }

    // ==================== 启动 ====================

    /// 启动前的一次性工作：清理过期队列、检查会话
    async fn bootstrap(&self) {
        if let Err(e) = self.reporter.sweep().await {
            warn!("[Agent] ⚠️ 启动时清理本地队列失败: {:#}", e);
        }
        self.sessions.check_all(false).await;
    }

    /// 启动所有定时任务
    pub async fn start(self: &Arc<Self>) -> AgentHandle {
        info!("[Agent] 🚀 启动 agent");
        self.bootstrap().await;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let agent = self.clone();
        let state = self.state.clone();
        tasks.push(spawn_periodic(
            "connectivity",
            shutdown.clone(),
            true,
            move || state.settings().backend_check_every(),
            move || {
                let agent = agent.clone();
                async move {
                    agent.probe().await;
                }
            },
        ));

        let agent = self.clone();
        let state = self.state.clone();
        tasks.push(spawn_periodic(
            "heartbeat",
            shutdown.clone(),
            false,
            move || state.settings().heartbeat_every(),
            move || {
                let agent = agent.clone();
                async move {
                    if let Err(e) = agent.send_heartbeat().await {
                        warn!("[Agent] 💔 心跳发送失败: {:#}", e);
                    }
                }
            },
        ));

        let agent = self.clone();
        let poll_every = self.config.command_poll_interval;
        tasks.push(spawn_periodic(
            "command-poll",
            shutdown.clone(),
            false,
            move || poll_every,
            move || {
                let agent = agent.clone();
                async move {
                    if let Err(e) = agent.poll_backend_command().await {
                        debug!("[Agent] 拉取后端命令失败: {:#}", e);
                    }
                }
            },
        ));

        let reporter = self.reporter.clone();
        let sweep_every = self.config.pending_sweep_interval;
        tasks.push(spawn_periodic(
            "pending-sweep",
            shutdown.clone(),
            false,
            move || sweep_every,
            move || {
                let reporter = reporter.clone();
                async move {
                    if let Err(e) = reporter.sweep().await {
                        error!("[Agent] ❌ 清理本地队列失败: {:#}", e);
                    }
                }
            },
        ));

        let agent = self.clone();
        let collect_every = self.config.auto_collect_interval;
        tasks.push(spawn_periodic(
            "auto-collect",
            shutdown.clone(),
            false,
            move || collect_every,
            move || {
                let agent = agent.clone();
                async move {
                    agent.auto_collect();
                }
            },
        ));

        if let Some(dir) = self.config.inbox_dir.clone() {
            info!("[Agent] 📂 监听旁路命令目录: {}", dir.display());
            let agent = self.clone();
            tasks.push(spawn_periodic(
                "inbox",
                shutdown.clone(),
                true,
                move || INBOX_SCAN_INTERVAL,
                move || {
                    let agent = agent.clone();
                    let dir = dir.clone();
                    async move {
                        if let Err(e) = agent.drain_inbox(&dir).await {
                            debug!("[Agent] 扫描收件目录失败: {:#}", e);
                        }
                    }
                },
            ));
        }

        AgentHandle { shutdown, tasks }
    }
}

fn invalid(command: &Command, e: anyhow::Error) -> DispatchOutcome {
    warn!("[Command] ⚠️ 命令 {} 内容无效，已丢弃: {:#}", command.action, e);
    DispatchOutcome::Invalid(format!("{:#}", e))
}

/// 读取 `data.platform`；缺省时返回 None
fn platform_of(data: &serde_json::Value) -> Result<Option<Platform>> {
    match data.get("platform") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(name)) => Ok(Some(name.parse()?)),
        Some(other) => Err(anyhow!("platform 必须是字符串: {}", other)),
    }
}

/// 周期任务：每次执行完 `tick` 后按 `interval()` 等待，收到关闭信号即退出
fn spawn_periodic<I, F, Fut>(
    name: &'static str,
    shutdown: CancellationToken,
    run_immediately: bool,
    interval: I,
    mut tick: F,
) -> JoinHandle<()>
where
    I: Fn() -> Duration + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        debug!("[Agent] ⏱️ 定时任务 {} 已启动", name);
        if !run_immediately {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval()) => {}
            }
        }
        loop {
            tick().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval()) => {}
            }
        }
        debug!("[Agent] 定时任务 {} 已退出", name);
    })
}
