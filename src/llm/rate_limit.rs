//! 令牌桶限流
//!
//! RateLimiter 以固定速率补充令牌，容量即允许的突发调用数；
//! ThrottledClient 在每次结构化调用前取一个令牌。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitSection;
use crate::llm::{CallRequest, CallResponse, LlmError, StructuredCallClient};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// refill_per_sec <= 0 时不限流
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(cfg: &RateLimitSection) -> Self {
        Self::new(cfg.capacity, cfg.refill_per_sec)
    }

    /// 取一个令牌，不足时等待补充
    pub async fn acquire(&self) {
        if self.refill_per_sec <= 0.0 {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
            tokio::time::sleep(wait).await;
        }
    }
}

/// 限流包装：每次调用前 acquire
pub struct ThrottledClient {
    inner: Arc<dyn StructuredCallClient>,
    limiter: Arc<RateLimiter>,
}

impl ThrottledClient {
    pub fn new(inner: Arc<dyn StructuredCallClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl StructuredCallClient for ThrottledClient {
    async fn call(&self, request: CallRequest) -> Result<CallResponse, LlmError> {
        self.limiter.acquire().await;
        self.inner.call(request).await
    }
}
