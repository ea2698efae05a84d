//! 测试用的假实现与组装工具

use crate::agent::backend::{BackendApi, HeartbeatReq, NextCommandResp};
use crate::agent::collection::{CollectionCoordinator, CollectionRun};
use crate::agent::config::{AgentConfig, SettingsPatch};
use crate::agent::db::create_memory_pool;
use crate::agent::env::{Clock, Jitter};
use crate::agent::listener::AgentListener;
use crate::agent::platform::{ConversationBatch, ConversationSummary, Platform, PlatformCollector};
use crate::agent::reporter::{PendingDao, Reporter};
use crate::agent::runtime::Agent;
use crate::agent::session::SessionMonitor;
use crate::agent::state::StateHandle;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{Pool, Sqlite};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::{Notify, Semaphore};

/// 测试时钟的起始时间
pub const START_MS: i64 = 1_700_000_000_000;

static INIT_LOGGER: Once = Once::new();

pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        // 当前 crate 打开 debug，关闭 sqlx 的 SQL 日志
        let filter_layer = EnvFilter::new("info,argosa_agent=debug,sqlx=warn");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

pub fn summaries(platform: Platform, n: usize) -> Vec<ConversationSummary> {
    (0..n)
        .map(|i| ConversationSummary {
            id: format!("{}-{}", platform, i),
            title: format!("{} 对话 {}", platform, i),
            url: None,
            created_at: Some(START_MS - 1_000 * i as i64),
            updated_at: None,
        })
        .collect()
}

// ==================== 时钟与抖动 ====================

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(AtomicI64::new(start_ms))
    }

    pub fn set(&self, ms: i64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct FixedJitter(pub u64);

impl Jitter for FixedJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        self.0.min(max_ms)
    }
}

// ==================== 后端 ====================

/// 记录所有调用的内存后端；离线时每个调用都返回错误
pub struct FakeBackend {
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
    settings: Mutex<SettingsPatch>,
    commands: Mutex<VecDeque<NextCommandResp>>,
    responses: Mutex<Vec<(String, serde_json::Value)>>,
    heartbeats: Mutex<Vec<HeartbeatReq>>,
    sessions: Mutex<Vec<(Platform, bool)>>,
    progress: Mutex<Vec<CollectionRun>>,
    batches: Mutex<Vec<ConversationBatch>>,
    failing_saves: Mutex<HashSet<Platform>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            settings: Mutex::new(SettingsPatch::default()),
            commands: Mutex::new(VecDeque::new()),
            responses: Mutex::new(Vec::new()),
            heartbeats: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            failing_saves: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeBackend {
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_settings(&self, patch: SettingsPatch) {
        *self.settings.lock() = patch;
    }

    pub fn push_command(&self, value: serde_json::Value) {
        let resp: NextCommandResp =
            serde_json::from_value(value).expect("valid next-command response");
        self.commands.lock().push_back(resp);
    }

    pub fn fail_saves_for(&self, platform: Platform) {
        self.failing_saves.lock().insert(platform);
    }

    pub fn clear_save_failures(&self) {
        self.failing_saves.lock().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn command_responses(&self) -> Vec<(String, serde_json::Value)> {
        self.responses.lock().clone()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatReq> {
        self.heartbeats.lock().clone()
    }

    pub fn session_updates(&self) -> Vec<(Platform, bool)> {
        self.sessions.lock().clone()
    }

    pub fn progress_posts(&self) -> Vec<CollectionRun> {
        self.progress.lock().clone()
    }

    pub fn saved_batches(&self) -> Vec<ConversationBatch> {
        self.batches.lock().clone()
    }

    fn enter(&self, call: String) -> Result<()> {
        self.calls.lock().push(call.clone());
        if !self.online.load(Ordering::SeqCst) {
            bail!("backend offline: {}", call);
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn check_status(&self) -> Result<()> {
        self.enter("status".into())
    }

    async fn send_heartbeat(&self, req: &HeartbeatReq) -> Result<()> {
        self.enter("heartbeat".into())?;
        self.heartbeats.lock().push(req.clone());
        Ok(())
    }

    async fn next_command(&self) -> Result<NextCommandResp> {
        self.enter("next_command".into())?;
        Ok(self
            .commands
            .lock()
            .pop_front()
            .unwrap_or_else(NextCommandResp::none))
    }

    async fn post_command_response(
        &self,
        command_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.enter(format!("command_response:{}", command_id))?;
        self.responses
            .lock()
            .push((command_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn fetch_settings(&self) -> Result<SettingsPatch> {
        self.enter("settings".into())?;
        Ok(self.settings.lock().clone())
    }

    async fn update_session(&self, platform: Platform, valid: bool) -> Result<()> {
        self.enter(format!("session_update:{}", platform))?;
        self.sessions.lock().push((platform, valid));
        Ok(())
    }

    async fn post_sync_progress(&self, run: &CollectionRun) -> Result<()> {
        self.enter("sync_progress".into())?;
        self.progress.lock().push(run.clone());
        Ok(())
    }

    async fn save_conversations(&self, batch: &ConversationBatch) -> Result<()> {
        self.enter(format!("save_conversations:{}", batch.platform))?;
        if self.failing_saves.lock().contains(&batch.platform) {
            bail!("save rejected for {}", batch.platform);
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

// ==================== 平台采集 ====================

/// 可控的平台采集实现
///
/// `gated()` 之后每次列出对话都会阻塞，直到测试调用 `release()`。
pub struct FakeCollector {
    platform: Platform,
    items: AtomicUsize,
    session_valid: AtomicBool,
    session_error: AtomicBool,
    list_error: AtomicBool,
    ignore_limit: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
    entered: Notify,
    session_checks: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeCollector {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            items: AtomicUsize::new(0),
            session_valid: AtomicBool::new(true),
            session_error: AtomicBool::new(false),
            list_error: AtomicBool::new(false),
            ignore_limit: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            entered: Notify::new(),
            session_checks: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn with_items(self: Arc<Self>, n: usize) -> Arc<Self> {
        self.items.store(n, Ordering::SeqCst);
        self
    }

    pub fn gated(self: Arc<Self>) -> Arc<Self> {
        self.gated.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_session_valid(&self, valid: bool) {
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    pub fn fail_session_check(&self) {
        self.session_error.store(true, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.list_error.store(true, Ordering::SeqCst);
    }

    /// 返回全部条目而不理会 limit（模拟不守规矩的实现）
    pub fn ignore_limit(&self) {
        self.ignore_limit.store(true, Ordering::SeqCst);
    }

    /// 等待某次列出对话的调用进入阻塞点
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn session_checks(&self) -> usize {
        self.session_checks.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformCollector for FakeCollector {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn check_session(&self) -> Result<bool> {
        self.session_checks.fetch_add(1, Ordering::SeqCst);
        if self.session_error.load(Ordering::SeqCst) {
            bail!("{} session probe crashed", self.platform);
        }
        Ok(self.session_valid.load(Ordering::SeqCst))
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.acquire().await?.forget();
        }
        if self.list_error.load(Ordering::SeqCst) {
            bail!("{} listing failed", self.platform);
        }
        let available = self.items.load(Ordering::SeqCst);
        let n = if self.ignore_limit.load(Ordering::SeqCst) {
            available
        } else {
            available.min(limit)
        };
        Ok(summaries(self.platform, n))
    }
}

// ==================== 监听器 ====================

#[derive(Default)]
pub struct RecordingListener {
    modes: Mutex<Vec<bool>>,
    sessions: Mutex<Vec<(Platform, bool)>>,
    progress: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn mode_events(&self) -> Vec<bool> {
        self.modes.lock().clone()
    }

    pub fn session_events(&self) -> Vec<(Platform, bool)> {
        self.sessions.lock().clone()
    }

    pub fn progress_events(&self) -> Vec<CollectionRun> {
        self.progress
            .lock()
            .iter()
            .map(|json| serde_json::from_str(json).expect("progress snapshot json"))
            .collect()
    }
}

#[async_trait]
impl AgentListener for RecordingListener {
    async fn on_mode_changed(&self, connected: bool) {
        self.modes.lock().push(connected);
    }

    async fn on_session_changed(&self, platform: Platform, valid: bool) {
        self.sessions.lock().push((platform, valid));
    }

    async fn on_sync_progress(&self, run_json: String) {
        self.progress.lock().push(run_json);
    }
}

// ==================== 组装 ====================

/// 使用内存数据库与假实现组装的完整 agent
pub struct Harness {
    pub agent: Arc<Agent>,
    pub state: StateHandle,
    pub reporter: Arc<Reporter>,
    pub sessions: Arc<SessionMonitor>,
    pub coordinator: Arc<CollectionCoordinator>,
    pub pending: PendingDao,
    pub pool: Pool<Sqlite>,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<FakeBackend>,
    pub listener: Arc<RecordingListener>,
    collectors: Vec<Arc<FakeCollector>>,
}

impl Harness {
    pub async fn new() -> Result<Harness> {
        Self::with_collectors(Vec::new()).await
    }

    pub async fn with_collectors(collectors: Vec<Arc<FakeCollector>>) -> Result<Harness> {
        init_test_logger();
        let pool = create_memory_pool().await?;
        let clock = Arc::new(ManualClock::new(START_MS));
        let backend = Arc::new(FakeBackend::default());
        let listener = Arc::new(RecordingListener::default());
        Self::assemble(pool, clock, backend, listener, collectors).await
    }

    /// 在同一个数据库上重新构建 agent，模拟进程重启
    pub async fn reload(other: &Harness) -> Result<Harness> {
        Self::assemble(
            other.pool.clone(),
            other.clock.clone(),
            other.backend.clone(),
            Arc::new(RecordingListener::default()),
            other.collectors.clone(),
        )
        .await
    }

    async fn assemble(
        pool: Pool<Sqlite>,
        clock: Arc<ManualClock>,
        backend: Arc<FakeBackend>,
        listener: Arc<RecordingListener>,
        collectors: Vec<Arc<FakeCollector>>,
    ) -> Result<Harness> {
        let config = AgentConfig::new(
            "http://backend.test/api/argosa".to_string(),
            "sqlite::memory:".to_string(),
        );
        let mut builder = Agent::builder(config)
            .backend(backend.clone())
            .pool(pool.clone())
            .clock(clock.clone())
            .jitter(Arc::new(FixedJitter(0)))
            .listener(listener.clone());
        for collector in &collectors {
            builder = builder.collector(collector.clone());
        }
        let agent = builder.build().await?;

        Ok(Harness {
            state: agent.state().clone(),
            reporter: agent.reporter().clone(),
            sessions: agent.sessions().clone(),
            coordinator: agent.coordinator().clone(),
            pending: PendingDao::new(pool.clone()),
            agent,
            pool,
            clock,
            backend,
            listener,
            collectors,
        })
    }
}
