//! 待投递队列数据访问层（DAO）

use crate::agent::reporter::models::{PendingItem, PendingKind};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, warn};

/// 待投递队列 DAO（基于 sqlx）
pub struct PendingDao {
    db: Pool<Sqlite>,
}

impl PendingDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 入队，并把该类别裁剪到容量上限（保留最新的条目）
    pub async fn enqueue(&self, kind: PendingKind, payload: &str, created_at: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_items (kind, payload, created_at) VALUES (?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(payload)
        .bind(created_at)
        .execute(&self.db)
        .await
        .context("写入待投递队列失败")?;
        let id = result.last_insert_rowid();

        let trimmed = sqlx::query(
            r#"
            DELETE FROM pending_items
            WHERE kind = ?
              AND id NOT IN (
                  SELECT id FROM pending_items WHERE kind = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(kind.as_str())
        .bind(kind.as_str())
        .bind(kind.capacity())
        .execute(&self.db)
        .await
        .context("裁剪待投递队列失败")?
        .rows_affected();
        if trimmed > 0 {
            debug!(
                "[PendingDAO] 队列 {} 超出上限，丢弃最旧的 {} 条",
                kind.as_str(),
                trimmed
            );
        }
        Ok(id)
    }

    /// 按入队顺序列出所有条目
    pub async fn list_all(&self) -> Result<Vec<PendingItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, created_at FROM pending_items ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("查询待投递队列失败")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("kind");
            let id: i64 = row.get("id");
            match PendingKind::parse(&kind_str) {
                Ok(kind) => items.push(PendingItem {
                    id,
                    kind,
                    payload: row.get("payload"),
                    created_at: row.get("created_at"),
                }),
                Err(e) => warn!("[PendingDAO] ⚠️ 跳过无法识别的条目 {}: {}", id, e),
            }
        }
        Ok(items)
    }

    pub async fn count(&self, kind: PendingKind) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pending_items WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.db)
            .await
            .context("统计待投递队列失败")?;
        Ok(row.get("n"))
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_items WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .context("删除待投递条目失败")?;
        Ok(())
    }

    /// 删除早于 `cutoff` 的条目，返回删除数量
    pub async fn delete_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pending_items WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await
            .context("清理过期待投递条目失败")?;
        Ok(result.rows_affected())
    }
}
