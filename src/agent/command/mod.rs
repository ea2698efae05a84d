//! 命令模块
//!
//! 命令来自两条通道：旁路令牌（URL 片段）与后端轮询。
//! 两者都先经过校验与去重，再分发执行。

pub mod dedup;
pub mod models;
pub mod side_channel;

// 重新导出主要类型
pub use dedup::CommandDeduper;
pub use models::{Command, CommandAction, CommandRejection};
pub use side_channel::{decode_side_channel, InboxCarrier, SideChannelCarrier};
