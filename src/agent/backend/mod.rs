//! 后端模块
//!
//! 封装 agent 调用的所有后端 HTTP 接口

pub mod api;
pub mod types;

// 重新导出主要类型
pub use api::{BackendApi, HttpBackendApi};
pub use types::{HeartbeatReq, NextCommandResp, SessionUpdateReq};
