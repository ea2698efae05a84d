pub mod agent;

// 重新导出常用类型，方便外部使用
pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentHandle, AgentListener, AgentMode, CollectionRun,
    ConversationBatch, ConversationSummary, DispatchOutcome, EmptyAgentListener, Platform,
    PlatformCollector, RunStatus, Settings,
};
