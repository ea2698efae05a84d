//! 采集协调器
//!
//! 状态机：`idle → starting → collecting(i) → {completed | error} → idle`
//!
//! 同一时刻只允许一个任务持有运行槽位。槽位由 [`RunLease`] 在 `Drop` 时释放，
//! 且只会清除属于自己这一代的槽位，因此取消后立即开始的新任务不会被旧任务的
//! 收尾误释放。

use crate::agent::collection::models::{progress_for, CollectionRun, RunStatus, SyncRequest};
use crate::agent::config::Settings;
use crate::agent::env::Jitter;
use crate::agent::listener::AgentListener;
use crate::agent::platform::{ConversationBatch, ConversationSummary, Platform, PlatformRegistry};
use crate::agent::reporter::{ReportPayload, Reporter};
use crate::agent::session::SessionMonitor;
use crate::agent::state::StateHandle;
use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 平台之间额外随机等待的上限（毫秒）
const MAX_JITTER_MS: u64 = 3_000;

struct ActiveRun {
    generation: u64,
    sync_id: String,
    cancel: CancellationToken,
}

/// 运行槽位的持有凭证，析构时释放槽位
pub struct RunLease {
    slot: Arc<Mutex<Option<ActiveRun>>>,
    generation: u64,
    cancel: CancellationToken,
}

impl RunLease {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 槽位空闲或仍属于本任务时执行 `f`（在槽位锁内执行），
    /// 被取消的旧任务因此不会覆盖新任务的状态
    fn unless_superseded(&self, f: impl FnOnce()) -> bool {
        let slot = self.slot.lock();
        let superseded = slot
            .as_ref()
            .is_some_and(|active| active.generation != self.generation);
        if !superseded {
            f();
        }
        !superseded
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|active| active.generation) == Some(self.generation) {
            *slot = None;
            debug!("[Collect] 🔓 释放采集槽位 (generation={})", self.generation);
        }
    }
}

pub struct CollectionCoordinator {
    platforms: Arc<PlatformRegistry>,
    sessions: Arc<SessionMonitor>,
    reporter: Arc<Reporter>,
    state: StateHandle,
    jitter: Arc<dyn Jitter>,
    listener: Arc<dyn AgentListener>,
    slot: Arc<Mutex<Option<ActiveRun>>>,
    next_generation: AtomicU64,
}

impl CollectionCoordinator {
    pub fn new(
        platforms: Arc<PlatformRegistry>,
        sessions: Arc<SessionMonitor>,
        reporter: Arc<Reporter>,
        state: StateHandle,
        jitter: Arc<dyn Jitter>,
        listener: Arc<dyn AgentListener>,
    ) -> Self {
        Self {
            platforms,
            sessions,
            reporter,
            state,
            jitter,
            listener,
            slot: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn active_sync_id(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|active| active.sync_id.clone())
    }

    /// 尝试占用运行槽位；已有任务运行时返回 None（不排队、不重试）
    pub fn try_acquire(&self, sync_id: &str) -> Option<RunLease> {
        let mut slot = self.slot.lock();
        if let Some(active) = slot.as_ref() {
            info!(
                "[Collect] ⏭️ 已有采集任务 {} 在运行，忽略新任务 {}",
                active.sync_id, sync_id
            );
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRun {
            generation,
            sync_id: sync_id.to_string(),
            cancel: cancel.clone(),
        });
        debug!(
            "[Collect] 🔒 占用采集槽位: {} (generation={})",
            sync_id, generation
        );
        Some(RunLease {
            slot: self.slot.clone(),
            generation,
            cancel,
        })
    }

    /// 取消当前任务：立即释放槽位，并通知任务在下一个检查点退出
    pub fn cancel(&self) -> Option<String> {
        let active = self.slot.lock().take()?;
        active.cancel.cancel();
        info!("[Collect] 🛑 已取消采集任务: {}", active.sync_id);
        Some(active.sync_id)
    }

    /// 在后台启动任务；已有任务运行时返回 None
    pub fn spawn(self: &Arc<Self>, request: SyncRequest) -> Option<JoinHandle<CollectionRun>> {
        let lease = self.try_acquire(&request.sync_id)?;
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            coordinator.run(lease, request).await
        }))
    }

    /// 在当前任务中执行；已有任务运行时返回 None
    pub async fn run_now(&self, request: SyncRequest) -> Option<CollectionRun> {
        let lease = self.try_acquire(&request.sync_id)?;
        Some(self.run(lease, request).await)
    }

    /// 执行一次采集任务，返回最终快照；槽位在返回前释放
    pub async fn run(&self, lease: RunLease, request: SyncRequest) -> CollectionRun {
        info!(
            "[Collect] 🚀 开始采集任务 {}，平台: {:?}",
            request.sync_id, request.platforms
        );
        let mut run = CollectionRun::new(&request);
        self.emit(&lease, &run).await;

        match self.drive(&lease, &request, &mut run).await {
            Ok(total) => {
                run.status = RunStatus::Completed;
                run.progress = 100;
                run.collected = total;
                run.current_platform = None;
                info!(
                    "[Collect] ✅ 采集任务 {} 完成，共 {} 条",
                    request.sync_id, total
                );
            }
            Err(e) => {
                run.status = RunStatus::Error;
                run.message = Some(format!("{:#}", e));
                error!("[Collect] ❌ 采集任务 {} 失败: {:#}", request.sync_id, e);
            }
        }

        if self.emit(&lease, &run).await {
            self.state.persist().await;
        } else {
            debug!(
                "[Collect] 采集任务 {} 已被新任务取代，不再写入状态",
                request.sync_id
            );
        }
        drop(lease);
        run
    }

    async fn drive(
        &self,
        lease: &RunLease,
        request: &SyncRequest,
        run: &mut CollectionRun,
    ) -> Result<usize> {
        if request.platforms.is_empty() {
            bail!("没有需要采集的平台");
        }

        let total_platforms = request.platforms.len();
        let mut collected = 0usize;
        for (index, platform) in request.platforms.iter().copied().enumerate() {
            ensure_not_cancelled(lease)?;

            run.status = RunStatus::Collecting;
            run.progress = progress_for(index, total_platforms);
            run.current_platform = Some(platform);
            run.collected = collected;
            self.emit(lease, run).await;

            // 单个平台失败不影响后续平台
            let items = match self.collect_platform(platform, &request.settings).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("[Collect] ⚠️ {} 采集失败，按 0 条处理: {:#}", platform, e);
                    Vec::new()
                }
            };

            // 取消后到达的结果直接丢弃
            ensure_not_cancelled(lease)?;

            if !items.is_empty() {
                collected += items.len();
                let batch = ConversationBatch {
                    platform,
                    conversations: items,
                    timestamp: self.state.now_ms(),
                };
                self.reporter
                    .report(ReportPayload::Conversations(batch))
                    .await;
            }

            if index + 1 < total_platforms {
                self.pause_between_platforms(lease, &request.settings)
                    .await?;
            }
        }
        Ok(collected)
    }

    async fn collect_platform(
        &self,
        platform: Platform,
        settings: &Settings,
    ) -> Result<Vec<ConversationSummary>> {
        let collector = self
            .platforms
            .get(platform)
            .ok_or_else(|| anyhow!("{} 未注册采集器", platform))?;

        if !self.sessions.check(platform).await {
            warn!("[Collect] 🔐 {} 会话无效，跳过采集", platform);
            return Ok(Vec::new());
        }

        let limit = settings.max_conversations as usize;
        let mut items = collector.list_conversations(limit).await?;
        items.truncate(limit);
        info!("[Collect] 📥 {} 采集到 {} 条对话", platform, items.len());
        Ok(items)
    }

    async fn pause_between_platforms(&self, lease: &RunLease, settings: &Settings) -> Result<()> {
        let delay_ms = settings
            .random_delay
            .saturating_mul(1000)
            .saturating_add(self.jitter.jitter_ms(MAX_JITTER_MS));
        debug!("[Collect] ⏳ 平台间等待 {} ms", delay_ms);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
            _ = lease.cancel.cancelled() => Err(anyhow!("同步已取消")),
        }
    }

    /// 推送进度快照；返回状态是否写入了 AgentState
    async fn emit(&self, lease: &RunLease, run: &CollectionRun) -> bool {
        let recorded = lease.unless_superseded(|| self.state.set_last_sync_status(run.status));
        match serde_json::to_string(run) {
            Ok(json) => self.listener.on_sync_progress(json).await,
            Err(e) => error!("[Collect] 序列化进度失败: {}", e),
        }
        self.reporter
            .report(ReportPayload::Progress(run.clone()))
            .await;
        recorded
    }
}

fn ensure_not_cancelled(lease: &RunLease) -> Result<()> {
    if lease.is_cancelled() {
        bail!("同步已取消");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::AgentMode;
    use crate::agent::test_support::{FakeCollector, Harness};

    fn request(sync_id: &str, platforms: &[Platform], settings: Settings) -> SyncRequest {
        SyncRequest::new(sync_id, platforms.to_vec(), settings)
    }

    fn fast_settings() -> Settings {
        Settings {
            random_delay: 0,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn two_platforms_complete_with_summed_count() -> Result<()> {
        let chatgpt = FakeCollector::new(Platform::ChatGpt).with_items(3);
        let claude = FakeCollector::new(Platform::Claude).with_items(4);
        let h = Harness::with_collectors(vec![chatgpt, claude]).await?;
        h.state.set_mode(AgentMode::Connected);

        let settings = Settings {
            max_conversations: 5,
            ..fast_settings()
        };
        let run = h
            .coordinator
            .run_now(request(
                "s-1",
                &[Platform::ChatGpt, Platform::Claude],
                settings,
            ))
            .await
            .expect("slot free");

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress, 100);
        assert_eq!(run.collected, 7);

        let events = h.listener.progress_events();
        let statuses: Vec<(RunStatus, u8)> =
            events.iter().map(|e| (e.status, e.progress)).collect();
        assert_eq!(
            statuses,
            vec![
                (RunStatus::Starting, 0),
                (RunStatus::Collecting, 0),
                (RunStatus::Collecting, 50),
                (RunStatus::Completed, 100),
            ]
        );
        assert_eq!(events[1].current_platform, Some(Platform::ChatGpt));
        assert_eq!(events[2].current_platform, Some(Platform::Claude));

        let last = h.backend.progress_posts().pop().expect("progress posted");
        assert_eq!(last.status, RunStatus::Completed);
        assert_eq!(last.collected, 7);
        assert_eq!(h.backend.saved_batches().len(), 2);
        assert!(!h.coordinator.is_active());
        Ok(())
    }

    #[tokio::test]
    async fn failing_platform_is_skipped_not_fatal() -> Result<()> {
        let a = FakeCollector::new(Platform::ChatGpt).with_items(2);
        let b = FakeCollector::new(Platform::Claude).with_items(9);
        b.fail_listing();
        let c = FakeCollector::new(Platform::Gemini).with_items(5);
        let h = Harness::with_collectors(vec![a, b, c]).await?;

        let run = h
            .coordinator
            .run_now(request(
                "s-2",
                &[Platform::ChatGpt, Platform::Claude, Platform::Gemini],
                fast_settings(),
            ))
            .await
            .expect("slot free");

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress, 100);
        assert_eq!(run.collected, 7);
        let progress: Vec<u8> = h
            .listener
            .progress_events()
            .iter()
            .filter(|e| e.status == RunStatus::Collecting)
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress, vec![0, 33, 67]);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_session_yields_zero_items() -> Result<()> {
        let claude = FakeCollector::new(Platform::Claude).with_items(4);
        claude.set_session_valid(false);
        let h = Harness::with_collectors(vec![claude.clone()]).await?;

        let run = h
            .coordinator
            .run_now(request("s-3", &[Platform::Claude], fast_settings()))
            .await
            .expect("slot free");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.collected, 0);
        assert_eq!(claude.list_calls(), 0);
        assert!(!h.state.session(Platform::Claude).valid);
        Ok(())
    }

    #[tokio::test]
    async fn items_are_truncated_to_max_conversations() -> Result<()> {
        let chatgpt = FakeCollector::new(Platform::ChatGpt).with_items(50);
        chatgpt.ignore_limit();
        let h = Harness::with_collectors(vec![chatgpt]).await?;

        let settings = Settings {
            max_conversations: 10,
            ..fast_settings()
        };
        let run = h
            .coordinator
            .run_now(request("s-4", &[Platform::ChatGpt], settings))
            .await
            .expect("slot free");
        assert_eq!(run.collected, 10);
        Ok(())
    }

    #[tokio::test]
    async fn empty_platform_list_reports_error_and_releases() -> Result<()> {
        let h = Harness::new().await?;
        let run = h
            .coordinator
            .run_now(request("s-5", &[], fast_settings()))
            .await
            .expect("slot free");
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.message.is_some());
        assert!(!h.coordinator.is_active());
        assert_eq!(h.state.snapshot().last_sync_status, Some(RunStatus::Error));
        Ok(())
    }

    #[tokio::test]
    async fn second_sync_while_active_is_a_noop() -> Result<()> {
        let chatgpt = FakeCollector::new(Platform::ChatGpt).gated();
        let h = Harness::with_collectors(vec![chatgpt.clone()]).await?;

        let handle = h
            .coordinator
            .spawn(request("first", &[Platform::ChatGpt], fast_settings()))
            .expect("slot free");
        chatgpt.wait_entered().await;

        let before = h.listener.progress_events().len();
        assert!(h
            .coordinator
            .spawn(request("second", &[Platform::ChatGpt], fast_settings()))
            .is_none());
        assert_eq!(h.coordinator.active_sync_id().as_deref(), Some("first"));
        assert_eq!(h.listener.progress_events().len(), before);

        chatgpt.release();
        let run = handle.await?;
        assert_eq!(run.sync_id, "first");
        assert_eq!(run.status, RunStatus::Completed);
        assert!(!h.coordinator.is_active());
        Ok(())
    }

    #[tokio::test]
    async fn cancel_frees_slot_immediately_and_old_run_cannot_release_new_one() -> Result<()> {
        let chatgpt = FakeCollector::new(Platform::ChatGpt).with_items(3).gated();
        let claude = FakeCollector::new(Platform::Claude).with_items(2).gated();
        let h = Harness::with_collectors(vec![chatgpt.clone(), claude.clone()]).await?;

        let old = h
            .coordinator
            .spawn(request("old", &[Platform::ChatGpt, Platform::Claude], fast_settings()))
            .expect("slot free");
        chatgpt.wait_entered().await;

        assert_eq!(h.coordinator.cancel().as_deref(), Some("old"));
        assert!(!h.coordinator.is_active());

        // 旧任务仍卡在平台调用中，新任务无需等待即可开始
        let new = h
            .coordinator
            .spawn(request("new", &[Platform::Claude], fast_settings()))
            .expect("slot freed by cancel");
        claude.wait_entered().await;

        // 旧任务收尾时不能释放新任务的槽位
        chatgpt.release();
        let old_run = old.await?;
        assert_eq!(old_run.status, RunStatus::Error);
        assert_eq!(h.coordinator.active_sync_id().as_deref(), Some("new"));
        // 旧任务的收尾不覆盖新任务的状态
        assert_eq!(
            h.state.snapshot().last_sync_status,
            Some(RunStatus::Collecting)
        );
        // 取消后到达的结果被丢弃
        assert!(h
            .backend
            .saved_batches()
            .iter()
            .all(|b| b.platform != Platform::ChatGpt));

        claude.release();
        let new_run = new.await?;
        assert_eq!(new_run.status, RunStatus::Completed);
        assert_eq!(new_run.collected, 2);
        assert!(!h.coordinator.is_active());
        assert!(h.coordinator.cancel().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_run_without_successor_records_error() -> Result<()> {
        let chatgpt = FakeCollector::new(Platform::ChatGpt).with_items(3).gated();
        let h = Harness::with_collectors(vec![chatgpt.clone()]).await?;

        let handle = h
            .coordinator
            .spawn(request("lonely", &[Platform::ChatGpt], fast_settings()))
            .expect("slot free");
        chatgpt.wait_entered().await;
        assert_eq!(h.coordinator.cancel().as_deref(), Some("lonely"));

        chatgpt.release();
        let run = handle.await?;
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(h.state.snapshot().last_sync_status, Some(RunStatus::Error));
        Ok(())
    }
}
