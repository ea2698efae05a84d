//! 状态数据访问层（DAO）
//!
//! agent 状态与设置各保存为 `agent_records` 表中的一行 JSON 记录。

use crate::agent::config::Settings;
use crate::agent::state::models::AgentState;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, warn};

const STATE_KEY: &str = "state";
const SETTINGS_KEY: &str = "settings";

/// 状态 DAO（基于 sqlx）
pub struct StateDao {
    db: Pool<Sqlite>,
}

impl StateDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 读取持久化的 agent 状态，不存在或无法解析时返回 None
    pub async fn load_state(&self) -> Result<Option<(AgentState, i64)>> {
        self.load_record(STATE_KEY).await
    }

    pub async fn save_state(&self, state: &AgentState, saved_at: i64) -> Result<()> {
        self.save_record(STATE_KEY, state, saved_at).await
    }

    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        Ok(self
            .load_record::<Settings>(SETTINGS_KEY)
            .await?
            .map(|(settings, _)| settings))
    }

    pub async fn save_settings(&self, settings: &Settings, saved_at: i64) -> Result<()> {
        self.save_record(SETTINGS_KEY, settings, saved_at).await
    }

    async fn load_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        let row = sqlx::query(
            r#"
            SELECT payload, saved_at FROM agent_records WHERE record_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context(format!("查询持久化记录失败: {}", key))?;

        let Some(row) = row else {
            debug!("[StateDAO] 记录 {} 不存在", key);
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let saved_at: i64 = row.get("saved_at");
        match serde_json::from_str::<T>(&payload) {
            Ok(value) => Ok(Some((value, saved_at))),
            Err(e) => {
                // 记录损坏时按不存在处理，由调用方回落到默认值
                warn!("[StateDAO] ⚠️ 记录 {} 解析失败，忽略: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn save_record<T: Serialize>(&self, key: &str, value: &T, saved_at: i64) -> Result<()> {
        let payload = serde_json::to_string(value).context("序列化持久化记录失败")?;
        let sql = r#"
            INSERT INTO agent_records (record_key, payload, saved_at)
            VALUES (?, ?, ?)
            ON CONFLICT(record_key) DO UPDATE SET
                payload = excluded.payload,
                saved_at = excluded.saved_at
        "#;

        sqlx::query(sql)
            .bind(key)
            .bind(&payload)
            .bind(saved_at)
            .execute(&self.db)
            .await
            .context(format!("保存持久化记录失败: {}", key))?;
        debug!("[StateDAO] 已保存记录 {} (saved_at={})", key, saved_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::db::create_memory_pool;
    use crate::agent::platform::Platform;
    use crate::agent::state::models::{AgentMode, SessionInfo};

    #[tokio::test]
    async fn state_round_trips_through_sqlite() -> Result<()> {
        let dao = StateDao::new(create_memory_pool().await?);
        assert!(dao.load_state().await?.is_none());

        let mut state = AgentState::default();
        state.mode = AgentMode::Connected;
        state.sessions.insert(
            Platform::Grok,
            SessionInfo {
                valid: true,
                last_checked: 1_000,
            },
        );
        dao.save_state(&state, 5).await?;
        dao.save_state(&state, 9).await?;

        let (loaded, saved_at) = dao.load_state().await?.expect("state saved");
        assert_eq!(loaded, state);
        assert_eq!(saved_at, 9);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_settings_record_reads_as_missing() -> Result<()> {
        let pool = create_memory_pool().await?;
        sqlx::query("INSERT INTO agent_records (record_key, payload, saved_at) VALUES ('settings', 'not json', 1)")
            .execute(&pool)
            .await?;
        let dao = StateDao::new(pool);
        assert!(dao.load_settings().await?.is_none());
        Ok(())
    }
}
