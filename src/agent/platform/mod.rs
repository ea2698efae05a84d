//! 平台模块
//!
//! 定义受支持的对话平台以及每个平台的采集能力接口

pub mod collector;
pub mod models;

// 重新导出主要类型
pub use collector::{PlatformCollector, PlatformRegistry};
pub use models::{ConversationBatch, ConversationSummary, Platform};
