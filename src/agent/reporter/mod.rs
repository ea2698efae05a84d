//! 上报模块
//!
//! 已连接时直接投递到后端；断线或投递失败时写入本地待投递队列，
//! 重连后补发，超过保留期的条目定期清除

pub mod dao;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use dao::PendingDao;
pub use models::{FlushSummary, PendingItem, PendingKind, ReportOutcome, ReportPayload};
pub use service::Reporter;
