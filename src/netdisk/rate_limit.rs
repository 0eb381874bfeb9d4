// 接口调用限速器

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// 按固定间隔发放调用许可
///
/// 每秒最多 `n` 次调用；`n == 0` 表示不限速
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_second(calls: u32) -> Self {
        let interval = if calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / calls
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// 不限速
    pub fn unlimited() -> Self {
        Self::per_second(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.interval.is_zero()
    }

    /// 等待下一个可用的调用时间点
    pub async fn acquire(&self) {
        if self.is_unlimited() {
            return;
        }

        // 锁内只预订时间点，等待在锁外进行
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
