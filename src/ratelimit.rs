//! Rolling-window throttling for submission-creating endpoints.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use metrics::counter;

use crate::{config::RateLimitConfig, metrics::RATELIMIT_REJECTED};

/// In-memory per-key rate limiter. Keys are caller identities (wallet
/// address, falling back to peer address); exceeding the quota rejects the
/// request rather than queuing it.
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            quota: config.quota,
            window: Duration::from_secs(config.window),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key`. `Err` carries the duration until the oldest
    /// in-window hit expires.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let result = self.check_at(key, Instant::now());
        if result.is_err() {
            counter!(RATELIMIT_REJECTED).increment(1);
        }
        result
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut hits = self.hits.lock().expect("rate limiter lock poisoned");

        // Drop keys whose every hit has left the window.
        hits.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|&t| now.duration_since(t) < self.window)
        });

        let timestamps = hits.entry(key.to_owned()).or_default();
        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.quota {
            let oldest = *timestamps.front().expect("quota is nonzero");
            return Err(self.window - now.duration_since(oldest));
        }

        timestamps.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(quota: usize, window: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig { quota, window })
    }

    #[test]
    fn quota_exceeded_is_rejected() {
        let limiter = limiter(3, 60);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("wallet", now).is_ok());
        }
        let retry_after = limiter.check_at("wallet", now).unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn independent_keys_do_not_interfere() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("b", now).is_ok());
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_err());
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(2, 60);
        let start = Instant::now();
        assert!(limiter.check_at("k", start).is_ok());
        assert!(limiter
            .check_at("k", start + Duration::from_secs(30))
            .is_ok());
        assert!(limiter
            .check_at("k", start + Duration::from_secs(45))
            .is_err());
        // The first hit has left the window by now.
        assert!(limiter
            .check_at("k", start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn stale_keys_are_pruned() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        assert!(limiter.check_at("stale", start).is_ok());
        assert!(limiter
            .check_at("fresh", start + Duration::from_secs(120))
            .is_ok());
        assert!(!limiter
            .hits
            .lock()
            .unwrap()
            .contains_key("stale"));
    }
}
