use rand::Rng;
use std::time::Duration;

/// 指数退避参数
///
/// 第 n 次重试的基础延迟为 `min(initial * factor^n, max)`，
/// 抖动由调用方按各自的策略叠加
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// 初始延迟
    pub initial: Duration,
    /// 增长因子
    pub factor: f64,
    /// 延迟上限
    pub max: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor,
            max,
        }
    }

    /// 第 attempt 次重试（从 0 计数）的基础延迟
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// 对称抖动: `d * (1 ± frac)` 内均匀取值
pub fn jitter_symmetric(delay: Duration, frac: f64) -> Duration {
    let scale = 1.0 + rand::thread_rng().gen_range(-frac..=frac);
    Duration::from_secs_f64((delay.as_secs_f64() * scale).max(0.0))
}

/// 单向抖动: `d * (1 + uniform(0..frac))` 内均匀取值
pub fn jitter_upward(delay: Duration, frac: f64) -> Duration {
    let scale = 1.0 + rand::thread_rng().gen_range(0.0..=frac);
    Duration::from_secs_f64(delay.as_secs_f64() * scale)
}

/// 均匀附加抖动: `uniform(0..max)`
///
/// 用于打散并发重试方的网络请求
pub fn uniform_extra(max: Duration) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=max.as_millis() as u64))
}
