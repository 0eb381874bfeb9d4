// 统一重试策略
//
// 全库只有这一套退避规则：
// - 普通瞬时错误：base * 2^n，上限 max_delay
// - 限流：至少 0.9s + 2s * n，同样受 max_delay 限制
// - 计数器在每次成功后归零（分页列表按页计数）

use crate::config::RetryConfig;
use crate::error::{PanError, PanResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 限流时的基础等待
const RATE_LIMIT_BASE: Duration = Duration::from_millis(900);

/// 限流时每次额外增加的等待
const RATE_LIMIT_STEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    rate_limit_base: Duration,
    rate_limit_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_base: RATE_LIMIT_BASE,
            rate_limit_step: RATE_LIMIT_STEP,
        }
    }

    /// 固定次数、不等待的策略（测试与秒传导入用）
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_base: Duration::ZERO,
            rate_limit_step: Duration::ZERO,
        }
    }

    /// 固定间隔
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            rate_limit_base: delay,
            rate_limit_step: Duration::ZERO,
        }
    }

    /// 相同退避参数，不同的尝试次数
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// 第 `attempt` 次失败（从 0 开始）后的等待时间
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if rate_limited {
            let floor = self
                .rate_limit_base
                .saturating_add(self.rate_limit_step.saturating_mul(attempt));
            delay = delay.max(floor).min(self.max_delay.max(self.rate_limit_base));
        }
        delay
    }

    /// 重试瞬时错误，耗尽后返回最后一次的错误
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        mut op: F,
    ) -> PanResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PanResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            check_cancelled(cancel)?;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_interrupt() || !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                warn!("{} 失败，已尝试 {} 次: {}", what, attempt, err);
                return Err(err);
            }
            debug!(
                "{} 失败 (第 {}/{} 次): {}",
                what, attempt, self.max_attempts, err
            );
            self.backoff(attempt - 1, &err, cancel).await?;
        }
    }

    /// 按错误类型等待；被取消时立即返回 Interrupted
    pub async fn backoff(
        &self,
        attempt: u32,
        error: &PanError,
        cancel: &CancellationToken,
    ) -> PanResult<()> {
        sleep_or_cancel(cancel, self.delay_for(attempt, error.is_rate_limited())).await
    }
}

/// 可被取消的等待
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> PanResult<()> {
    if cancel.is_cancelled() {
        return Err(PanError::Interrupted);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(PanError::Interrupted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// 检查是否已被中断
pub fn check_cancelled(cancel: &CancellationToken) -> PanResult<()> {
    if cancel.is_cancelled() {
        Err(PanError::Interrupted)
    } else {
        Ok(())
    }
}
