//! 采集模块
//!
//! 串行执行采集任务：同一时刻最多一个 CollectionRun，平台之间严格顺序执行

pub mod models;
pub mod service;

// 重新导出主要类型
pub use models::{CollectionRun, RunStatus, SyncRequest};
pub use service::CollectionCoordinator;
