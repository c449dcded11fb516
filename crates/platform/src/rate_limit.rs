//! Fixed-window rate limiter backed by DashMap, used for unauthenticated
//! customer-facing actions keyed by client address.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: i64,
}

/// Per-key window counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Check (and consume) one request for `key` at `now`.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let window = Duration::seconds(self.config.window_secs);
        let max = self.config.max_requests;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_at: now + window,
            });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        if entry.count >= max {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: entry.reset_at,
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: max - entry.count,
            reset_at: entry.reset_at,
        }
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.reset_at);
        before - self.entries.len()
    }

    pub fn get_usage(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: max,
            window_secs: 60,
        })
    }

    #[test]
    fn test_window_limit() {
        let limiter = limiter(3);
        let now = Utc::now();

        for i in 0..3 {
            let result = limiter.check("203.0.113.7", now);
            assert!(result.allowed, "request {i} should be allowed");
            assert_eq!(result.remaining, 2 - i);
        }

        let result = limiter.check("203.0.113.7", now);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);

        // Other keys are independent.
        assert!(limiter.check("198.51.100.1", now).allowed);
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1);
        let now = Utc::now();
        assert!(limiter.check("k", now).allowed);
        assert!(!limiter.check("k", now + Duration::seconds(30)).allowed);
        assert!(limiter.check("k", now + Duration::seconds(61)).allowed);
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let limiter = limiter(5);
        let now = Utc::now();
        limiter.check("a", now);
        limiter.check("b", now + Duration::seconds(45));

        assert_eq!(limiter.cleanup(now + Duration::seconds(90)), 1);
        assert!(limiter.get_usage("a").is_none());
        assert_eq!(limiter.get_usage("b").unwrap().count, 1);
    }
}
