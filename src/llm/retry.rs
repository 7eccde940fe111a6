//! 限流重试策略：指数退避，优先采用服务端给出的 retry_after
//!
//! 仅对 LlmError::RateLimited 重试；其他错误原样返回。

use std::future::Future;
use std::time::Duration;

use crate::config::RateLimitSection;
use crate::llm::LlmError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RateLimitSection) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// 第 attempt 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let delay = match retry_after_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_backoff.saturating_mul(factor)
            }
        };
        delay.min(self.max_backoff)
    }

    /// 执行 op，遇限流按策略退避重试
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Err(LlmError::RateLimited { retry_after_ms }) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, retry_after_ms);
                    tracing::warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(350));
        assert_eq!(policy.delay_for(1, Some(50)), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1, Some(10_000)), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let result = policy
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LlmError::RateLimited { retry_after_ms: Some(10) })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let result: Result<(), LlmError> = policy
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::RateLimited { retry_after_ms: None })
            })
            .await;
        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), LlmError> = RetryPolicy::default()
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Timeout)
            })
            .await;
        assert_eq!(result, Err(LlmError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
