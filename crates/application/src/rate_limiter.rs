use chrono::Duration;
use config::RateLimitConfig;
use domain::{RealtimeError, Timestamp, UserId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::clock::Clock;

/// 握手被限流
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded: {current}/{max} attempts per window")]
pub struct RateLimitError {
    pub current: u32,
    pub max: u32,
}

impl From<RateLimitError> for RealtimeError {
    fn from(value: RateLimitError) -> Self {
        RealtimeError::RateLimited {
            current: value.current,
            max: value.max,
        }
    }
}

/// 单个身份的固定窗口计数器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCounter {
    /// 当前窗口内的握手次数
    pub count: u32,
    /// 当前窗口的结束时间
    pub window_reset_at: Timestamp,
}

impl RateLimitCounter {
    fn fresh(now: Timestamp, window: Duration) -> Self {
        Self {
            count: 1,
            window_reset_at: now + window,
        }
    }
}

/// 握手限流器
///
/// 固定窗口算法：按身份计数，窗口到期后整体重置。被拒绝时不报错，
/// 由调用方决定拒绝连接。
pub struct ConnectionRateLimiter {
    /// 每个窗口允许的最大握手次数
    max_attempts: u32,
    /// 时间窗口大小
    window: Duration,
    /// 身份计数器
    counters: RwLock<HashMap<UserId, RateLimitCounter>>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRateLimiter {
    pub fn new(max_attempts: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_attempts,
            window,
            counters: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = Duration::seconds(i64::try_from(config.window_secs).unwrap_or(i64::MAX));
        Self::new(config.max_attempts, window, clock)
    }

    /// 检查身份是否可以建立新连接
    pub fn admit(&self, user_id: &UserId) -> bool {
        self.check(user_id).is_ok()
    }

    /// 与 [`admit`](Self::admit) 相同，被拒绝时带上当前计数
    pub fn check(&self, user_id: &UserId) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match counters.get_mut(user_id) {
            Some(counter) if now < counter.window_reset_at => {
                if counter.count >= self.max_attempts {
                    tracing::warn!(
                        user_id = %user_id,
                        count = counter.count,
                        max = self.max_attempts,
                        "connection attempt rate limited"
                    );
                    return Err(RateLimitError {
                        current: counter.count,
                        max: self.max_attempts,
                    });
                }
                counter.count += 1;
            }
            // 没有计数器或窗口已过期：开启新窗口
            _ => {
                counters.insert(user_id.clone(), RateLimitCounter::fresh(now, self.window));
            }
        }
        Ok(())
    }

    /// 获取身份当前计数
    pub fn status(&self, user_id: &UserId) -> Option<RateLimitCounter> {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(user_id).copied()
    }

    /// 清理早已过期的计数器（防止内存泄漏）
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|_, counter| now < counter.window_reset_at + self.window);
        before - counters.len()
    }

    /// 重置身份配额（管理员功能）
    pub fn reset(&self, user_id: &UserId) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
    }

    /// 当前跟踪的身份数
    pub fn tracked(&self) -> usize {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn limiter() -> (ConnectionRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = ConnectionRateLimiter::new(5, Duration::seconds(60), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_sixth_attempt_in_window_is_rejected() {
        let (limiter, clock) = limiter();
        let user = UserId::from("u1");

        // t=0..4 成功
        for second in 0..5 {
            assert!(limiter.admit(&user), "attempt at t={} should pass", second);
            clock.advance(Duration::seconds(1));
        }

        // t=5 同一窗口，被拒绝
        let result = limiter.check(&user);
        assert_eq!(result, Err(RateLimitError { current: 5, max: 5 }));
        assert_eq!(
            RealtimeError::from(RateLimitError { current: 5, max: 5 }).code(),
            "RATE_LIMITED"
        );

        // t=61 新窗口
        clock.advance(Duration::seconds(56));
        assert!(limiter.admit(&user));
        assert_eq!(limiter.status(&user).map(|c| c.count), Some(1));
    }

    #[test]
    fn test_identities_are_counted_separately() {
        let (limiter, _clock) = limiter();
        let first = UserId::from("u1");
        let second = UserId::from("u2");

        for _ in 0..5 {
            assert!(limiter.admit(&first));
        }
        assert!(!limiter.admit(&first));
        assert!(limiter.admit(&second));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let (limiter, clock) = limiter();
        let user = UserId::from("u1");
        for _ in 0..5 {
            limiter.admit(&user);
        }
        let reset_at = limiter.status(&user).unwrap().window_reset_at;

        clock.advance(Duration::seconds(30));
        assert!(!limiter.admit(&user));
        assert_eq!(limiter.status(&user).unwrap().window_reset_at, reset_at);
    }

    #[test]
    fn test_cleanup_removes_long_expired_counters() {
        let (limiter, clock) = limiter();
        limiter.admit(&UserId::from("old"));
        clock.advance(Duration::seconds(90));
        limiter.admit(&UserId::from("recent"));

        // old 的窗口在 t=60 结束，t=120 之后才算早已过期
        assert_eq!(limiter.cleanup_expired(), 0);
        clock.advance(Duration::seconds(31));
        assert_eq!(limiter.cleanup_expired(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.status(&UserId::from("recent")).is_some());
    }

    #[test]
    fn test_reset_clears_quota() {
        let (limiter, _clock) = limiter();
        let user = UserId::from("u1");
        for _ in 0..5 {
            limiter.admit(&user);
        }
        assert!(!limiter.admit(&user));
        limiter.reset(&user);
        assert!(limiter.admit(&user));
    }
}
