//! 运行环境抽象：时钟与随机抖动
//!
//! agent 内所有"当前时间"和"随机延迟"都经由这里注入，测试中替换为可控实现。

use rand::Rng;

/// 毫秒级时钟
pub trait Clock: Send + Sync {
    /// 当前 Unix 时间戳（毫秒）
    fn now_ms(&self) -> i64;
}

/// 系统时钟
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 随机抖动来源
pub trait Jitter: Send + Sync {
    /// 返回 `[0, max_ms]` 区间内的毫秒数
    fn jitter_ms(&self, max_ms: u64) -> u64;
}

/// 基于线程本地随机数生成器的抖动
pub struct ThreadRngJitter;

impl Jitter for ThreadRngJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=max_ms)
    }
}
