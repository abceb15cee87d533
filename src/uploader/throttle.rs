// 上传带宽限速
//
// 令牌桶：预算按配置速率（字节/秒）累积，容量为一个分片大小，
// 空闲期间累积的预算不会超过一个分片，避免恢复发送后出现大突发。
// 桶初始为空，因此任意一组 acquire 的总耗时不小于 总字节数 / 速率。

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    /// 当前可用预算（字节，欠账时为负）
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶限速器
///
/// 单个会话内共享；速率为 0 表示不限速
#[derive(Debug)]
pub struct TokenBucketThrottle {
    /// 字节/秒
    rate: u64,
    /// 桶容量（字节）
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketThrottle {
    /// 创建限速器
    ///
    /// # 参数
    /// * `bytes_per_sec` - 速率上限，0 表示不限速
    /// * `capacity` - 桶容量，一般取分片大小
    pub fn new(bytes_per_sec: u64, capacity: u64) -> Self {
        Self {
            rate: bytes_per_sec,
            capacity: capacity.max(1) as f64,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 不限速
    pub fn unlimited() -> Self {
        Self::new(0, 1)
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    /// 申请 `n_bytes` 的发送预算，预算不足时挂起直到累积足够
    pub async fn acquire(&self, n_bytes: u64) {
        if self.is_unlimited() || n_bytes == 0 {
            return;
        }

        let wait = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.rate as f64).min(self.capacity);
            bucket.last_refill = now;

            // 先扣除，不足部分记为欠账，由本次调用等待补齐
            bucket.tokens -= n_bytes as f64;
            if bucket.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.tokens / self.rate as f64)
            }
        };

        if !wait.is_zero() {
            trace!("限速等待 {:?} (申请 {} bytes)", wait, n_bytes);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let throttle = TokenBucketThrottle::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            throttle.acquire(10 * 1024 * 1024).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_elapsed_respects_rate() {
        // 10KB/s，共申请 5KB，至少 0.5 秒
        let throttle = TokenBucketThrottle::new(10 * 1024, 2 * 1024);
        let start = Instant::now();
        for _ in 0..5 {
            throttle.acquire(1024).await;
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(480),
            "elapsed {:?} shorter than budget allows",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_request_larger_than_capacity_completes() {
        let throttle = TokenBucketThrottle::new(100 * 1024, 1024);
        let start = Instant::now();
        throttle.acquire(20 * 1024).await;
        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_idle_accumulation_capped_at_capacity() {
        let throttle = TokenBucketThrottle::new(1024 * 1024, 1024);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 空闲 50ms 最多累积 1KB，申请 101KB 需要约 100ms
        let start = Instant::now();
        throttle.acquire(101 * 1024).await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
