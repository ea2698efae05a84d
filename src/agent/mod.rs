//! Argosa 数据采集 agent
//!
//! - 连接监控：定期探测后端，在 standalone / connected 之间切换
//! - 命令：旁路令牌与后端轮询两条通道，统一校验、去重后分发
//! - 采集：串行执行 CollectionRun，可取消
//! - 上报：连接时直接投递，断线时写入本地队列，重连后补发

pub mod backend;
pub mod collection;
pub mod command;
pub mod config;
pub mod db;
pub mod env;
pub mod listener;
pub mod platform;
pub mod reporter;
pub mod runtime;
pub mod serialization;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出主要类型
pub use collection::{CollectionCoordinator, CollectionRun, RunStatus, SyncRequest};
pub use command::{Command, CommandRejection, InboxCarrier, SideChannelCarrier};
pub use config::{AgentConfig, Settings, SettingsPatch};
pub use listener::{AgentListener, EmptyAgentListener};
pub use platform::{ConversationBatch, ConversationSummary, Platform, PlatformCollector};
pub use runtime::{Agent, AgentBuilder, AgentHandle, DispatchOutcome};
pub use state::{AgentMode, AgentState, SessionInfo};
