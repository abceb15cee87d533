// 重试策略
//
// 退避状态按分片计算：分片成功后计数归零，长时间上传不会累积等待。

use crate::config::RetryConfig;
use crate::uploader::TransportError;
use std::time::Duration;

/// 表示配额/限流的错误原因
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
    "uploadLimitExceeded",
];

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 网络超时、连接重置、5xx（可重试）
    Transient,
    /// 配额/限流（可重试，单独上报）
    RateLimited,
    /// 参数错误等（不可重试）
    Fatal,
}

impl ErrorClass {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::RateLimited)
    }
}

/// 单次失败后的重试决定
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
    pub reason: String,
}

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 单个分片最多尝试次数
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
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
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// 错误分类
    pub fn classify(error: &TransportError) -> ErrorClass {
        match error {
            TransportError::Timeout(_) | TransportError::Network(_) => ErrorClass::Transient,
            TransportError::Status { status, reason, .. } => match *status {
                429 => ErrorClass::RateLimited,
                403 if reason
                    .as_deref()
                    .is_some_and(|r| QUOTA_REASONS.contains(&r)) =>
                {
                    ErrorClass::RateLimited
                }
                500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            TransportError::Protocol(_) => ErrorClass::Fatal,
        }
    }

    /// 第 `attempt` 次重试前的等待时间（attempt 从 0 开始）
    ///
    /// `initial_delay * backoff_factor^attempt`，不超过 `max_delay`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// 根据分类和已失败次数（含本次，从 1 开始）决定是否重试
    pub fn decide(&self, class: ErrorClass, failed_attempts: u32) -> RetryDecision {
        if !class.is_retriable() {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                reason: "不可重试的错误".to_string(),
            };
        }

        if failed_attempts >= self.max_attempts {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                reason: format!("已达最大尝试次数 ({})", self.max_attempts),
            };
        }

        let delay = self.next_delay(failed_attempts.saturating_sub(1));
        RetryDecision {
            retry: true,
            delay,
            reason: match class {
                ErrorClass::RateLimited => "配额限流，退避后重试".to_string(),
                _ => "临时错误，退避后重试".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }

    fn status(code: u16, reason: Option<&str>) -> TransportError {
        TransportError::Status {
            status: code,
            reason: reason.map(str::to_string),
            message: String::new(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            RetryPolicy::classify(&TransportError::Timeout("t".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            RetryPolicy::classify(&TransportError::Network("reset".into())),
            ErrorClass::Transient
        );
        assert_eq!(RetryPolicy::classify(&status(503, None)), ErrorClass::Transient);
        assert_eq!(RetryPolicy::classify(&status(500, None)), ErrorClass::Transient);
        assert_eq!(RetryPolicy::classify(&status(429, None)), ErrorClass::RateLimited);
        assert_eq!(
            RetryPolicy::classify(&status(403, Some("quotaExceeded"))),
            ErrorClass::RateLimited
        );
        assert_eq!(
            RetryPolicy::classify(&status(403, Some("forbidden"))),
            ErrorClass::Fatal
        );
        assert_eq!(RetryPolicy::classify(&status(400, None)), ErrorClass::Fatal);
        assert_eq!(
            RetryPolicy::classify(&TransportError::Protocol("no id".into())),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_next_delay_sequence() {
        let p = policy();
        assert_eq!(p.next_delay(0), Duration::from_secs(1));
        assert_eq!(p.next_delay(1), Duration::from_millis(1500));
        assert_eq!(p.next_delay(2), Duration::from_millis(2250));
        assert_eq!(p.next_delay(100), Duration::from_secs(60));
        assert_eq!(p.next_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_next_delay_monotonic_and_capped() {
        let p = policy();
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let d = p.next_delay(attempt);
            assert!(d >= last);
            assert!(d <= p.max_delay);
            last = d;
        }
    }

    #[test]
    fn test_decide() {
        let p = policy();

        let d = p.decide(ErrorClass::Transient, 1);
        assert!(d.retry);
        assert_eq!(d.delay, Duration::from_secs(1));

        let d = p.decide(ErrorClass::RateLimited, 2);
        assert!(d.retry);
        assert_eq!(d.delay, Duration::from_millis(1500));

        assert!(!p.decide(ErrorClass::Transient, 5).retry);
        assert!(!p.decide(ErrorClass::Fatal, 1).retry);
    }

    #[test]
    fn test_from_config_guards_degenerate_values() {
        let config = RetryConfig {
            max_attempts: 0,
            backoff_factor: 0.5,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.backoff_factor, 1.0);
    }
}
