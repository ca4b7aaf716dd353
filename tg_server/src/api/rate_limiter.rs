//! Sliding-window rate limiting for login and agent endpoints.
//!
//! Login attempts are limited per client IP, heartbeats per device token, and
//! rejected heartbeats per client IP; a client over its limit gets
//! `429 rate_limited`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Rate limiter using a sliding window algorithm
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of recent requests
    timestamps: VecDeque<Instant>,
    /// Maximum number of requests allowed in the window
    max_requests: usize,
    /// Time window for rate limiting
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// ```
    /// use tg_server::api::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
    /// assert!(limiter.check());
    /// assert!(limiter.check());
    /// assert!(!limiter.check());
    /// ```
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests),
            max_requests,
            window,
        }
    }

    /// Check if a request should be allowed, recording it when it is
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&mut self, now: Instant) -> bool {
        if self.is_full_at(now) {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    fn is_full_at(&mut self, now: Instant) -> bool {
        self.evict(now);
        self.timestamps.len() >= self.max_requests
    }

    fn evict(&mut self, now: Instant) {
        while let Some(ts) = self.timestamps.front() {
            if now.duration_since(*ts) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Get the number of remaining requests allowed in the current window
    pub fn remaining(&self) -> usize {
        self.max_requests.saturating_sub(self.timestamps.len())
    }

    /// Time until the oldest request leaves the window
    pub fn reset_in(&self) -> Option<Duration> {
        self.timestamps.front().map(|oldest| {
            let elapsed = Instant::now().duration_since(*oldest);
            self.window.saturating_sub(elapsed)
        })
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.timestamps
            .back()
            .is_none_or(|newest| now.duration_since(*newest) >= self.window)
    }
}

/// One sliding window per client key
#[derive(Debug)]
pub struct KeyedRateLimiter {
    limiters: Mutex<HashMap<String, RateLimiter>>,
    max_requests: usize,
    window: Duration,
}

/// Key count above which idle windows are dropped on the next check
const PRUNE_THRESHOLD: usize = 10_000;

impl KeyedRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record a request for `key`; `false` when it is over the limit
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut limiters = self.lock_pruned(now);

        match limiters.get_mut(key) {
            Some(limiter) => limiter.check_at(now),
            None => {
                let mut limiter = RateLimiter::new(self.max_requests, self.window);
                let allowed = limiter.check_at(now);
                limiters.insert(key.to_string(), limiter);
                allowed
            }
        }
    }

    /// Whether `key` has used its whole budget; records nothing
    pub fn is_exhausted(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut limiters = self.lock_pruned(now);
        limiters
            .get_mut(key)
            .is_some_and(|limiter| limiter.is_full_at(now))
    }

    /// Count an event against `key` without asking for permission
    pub fn record(&self, key: &str) {
        let _ = self.check(key);
    }

    fn lock_pruned(&self, now: Instant) -> MutexGuard<'_, HashMap<String, RateLimiter>> {
        let mut limiters = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if limiters.len() > PRUNE_THRESHOLD {
            limiters.retain(|_, limiter| !limiter.is_idle(now));
        }
        limiters
    }

    /// Number of clients currently tracked
    pub fn tracked_keys(&self) -> usize {
        match self.limiters.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rate_limiter_blocks_over_limit() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(1));

        for _ in 0..3 {
            assert!(limiter.check());
        }

        assert!(!limiter.check(), "Should block request over limit");
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_rate_limiter_window_expiry() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(100));

        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());

        thread::sleep(Duration::from_millis(150));

        assert!(limiter.check(), "Should allow after window expires");
        assert_eq!(limiter.remaining(), 1);
    }

    #[test]
    fn test_window_slides_instead_of_resetting() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check_at(start));
        assert!(limiter.check_at(start + Duration::from_secs(30)));
        assert!(!limiter.check_at(start + Duration::from_secs(59)));
        // First request left the window, second has not
        assert!(limiter.check_at(start + Duration::from_secs(60)));
        assert!(!limiter.check_at(start + Duration::from_secs(61)));
    }

    #[test]
    fn test_reset_in() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(1));
        assert!(limiter.reset_in().is_none());

        limiter.check();
        let reset = limiter.reset_in().unwrap();
        assert!(reset <= Duration::from_secs(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = KeyedRateLimiter::per_minute(2);

        assert!(limiter.check("203.0.113.10"));
        assert!(limiter.check("203.0.113.10"));
        assert!(!limiter.check("203.0.113.10"));

        assert!(limiter.check("198.51.100.20"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_recorded_failures_exhaust_without_checks() {
        let limiter = KeyedRateLimiter::per_minute(2);
        assert!(!limiter.is_exhausted("10.0.0.9"));
        // Looking does not create a window
        assert_eq!(limiter.tracked_keys(), 0);

        limiter.record("10.0.0.9");
        assert!(!limiter.is_exhausted("10.0.0.9"));
        limiter.record("10.0.0.9");
        assert!(limiter.is_exhausted("10.0.0.9"));
        assert!(limiter.is_exhausted("10.0.0.9"));
        assert!(!limiter.is_exhausted("10.0.0.10"));
    }

    #[test]
    fn test_login_limit_of_ten_per_minute() {
        let limiter = KeyedRateLimiter::per_minute(10);
        let allowed = (0..11).filter(|_| limiter.check("10.0.0.1")).count();
        assert_eq!(allowed, 10);
    }
}
