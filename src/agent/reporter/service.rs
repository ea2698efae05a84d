//! 上报服务层

use crate::agent::backend::BackendApi;
use crate::agent::reporter::dao::PendingDao;
use crate::agent::reporter::models::{
    FlushSummary, PendingItem, ReportOutcome, ReportPayload, PENDING_RETENTION_MS,
};
use crate::agent::state::StateHandle;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 上报器：连接时直接投递，否则写入本地队列
pub struct Reporter {
    backend: Arc<dyn BackendApi>,
    dao: PendingDao,
    state: StateHandle,
}

impl Reporter {
    pub fn new(backend: Arc<dyn BackendApi>, dao: PendingDao, state: StateHandle) -> Self {
        Self {
            backend,
            dao,
            state,
        }
    }

    async fn deliver(&self, payload: &ReportPayload) -> Result<()> {
        match payload {
            ReportPayload::Conversations(batch) => self.backend.save_conversations(batch).await,
            ReportPayload::Progress(run) => self.backend.post_sync_progress(run).await,
        }
    }

    /// 上报；不会向调用方返回错误
    pub async fn report(&self, payload: ReportPayload) -> ReportOutcome {
        if self.state.is_connected() {
            match self.deliver(&payload).await {
                Ok(()) => return ReportOutcome::Delivered,
                Err(e) => warn!(
                    "[Reporter] ⚠️ 投递失败，转入本地队列 ({}): {:#}",
                    payload.kind().as_str(),
                    e
                ),
            }
        } else {
            debug!(
                "[Reporter] 离线模式，{} 写入本地队列",
                payload.kind().as_str()
            );
        }

        match self.enqueue(&payload).await {
            Ok(()) => ReportOutcome::Queued,
            Err(e) => {
                error!("[Reporter] ❌ 写入本地队列失败，数据丢弃: {:?}", e);
                ReportOutcome::Dropped
            }
        }
    }

    async fn enqueue(&self, payload: &ReportPayload) -> Result<()> {
        let json = serde_json::to_string(payload).context("序列化上报内容失败")?;
        self.dao
            .enqueue(payload.kind(), &json, self.state.now_ms())
            .await?;
        Ok(())
    }

    async fn deliver_stored(&self, item: &PendingItem) -> Result<()> {
        let payload = ReportPayload::from_stored(item.kind, &item.payload)
            .context(format!("解析待投递条目 {} 失败", item.id))?;
        self.deliver(&payload).await
    }

    /// 补发本地队列：成功的条目删除，失败的保留等待下次
    pub async fn flush(&self) -> Result<FlushSummary> {
        let items = self.dao.list_all().await?;
        if items.is_empty() {
            debug!("[Reporter] 本地队列为空，无需补发");
            return Ok(FlushSummary::default());
        }

        info!("[Reporter] 📤 开始补发本地队列，共 {} 条", items.len());
        let mut summary = FlushSummary::default();
        for item in &items {
            match self.deliver_stored(item).await {
                Ok(()) => {
                    self.dao.delete(item.id).await?;
                    summary.delivered += 1;
                }
                Err(e) => {
                    debug!("[Reporter] 条目 {} 补发失败，保留: {:#}", item.id, e);
                    summary.remaining += 1;
                }
            }
        }

        info!(
            "[Reporter] ✅ 补发完成 - 成功: {}, 保留: {}",
            summary.delivered, summary.remaining
        );
        Ok(summary)
    }

    /// 清除超过保留期的条目（无论是否投递成功过）
    pub async fn sweep(&self) -> Result<u64> {
        let cutoff = self.state.now_ms() - PENDING_RETENTION_MS;
        let removed = self.dao.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!("[Reporter] 🧹 清除过期待投递条目 {} 条", removed);
        }
        Ok(removed)
    }
}
