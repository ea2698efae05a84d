//! agent 状态模块
//!
//! 持有连接模式、各平台会话缓存以及在线设置，并负责落盘

pub mod dao;
pub mod handle;
pub mod models;

// 重新导出主要类型
pub use dao::StateDao;
pub use handle::StateHandle;
pub use models::{AgentMode, AgentState, SessionInfo};
