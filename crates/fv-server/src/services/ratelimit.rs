//! Per-source sliding-window rate limiting.
//!
//! Two independent instances guard the expensive or abusable paths: login
//! (`MAX_LOGIN_ATTEMPTS` failures per lockout window) and Wake-on-LAN
//! (`WAKE_MAX_ATTEMPTS` packets per minute). Sources are keyed by the
//! apparent client address.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Wake-on-LAN window: at most this many packets per source per minute.
pub const WAKE_MAX_ATTEMPTS: u32 = 5;
pub const WAKE_WINDOW_SECS: u64 = 60;

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    hits: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Seconds until the window frees a slot, when the source is currently
    /// at or over the limit. `None` means the source may proceed.
    pub fn at_limit(&self, source: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entry = self.hits.get_mut(source)?;
        entry.retain(|t| now.duration_since(*t) < self.window);
        if (entry.len() as u32) < self.max {
            return None;
        }
        let oldest = entry.first().copied()?;
        let retry = self.window.saturating_sub(now.duration_since(oldest));
        Some(retry.as_secs().max(1))
    }

    /// Record one attempt from `source`; returns the count now inside the
    /// window.
    pub fn record(&self, source: &str) -> u32 {
        let now = Instant::now();
        let mut entry = self.hits.entry(source.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        entry.push(now);
        entry.len() as u32
    }

    /// Forget a source entirely (e.g. after a successful login).
    pub fn reset(&self, source: &str) {
        self.hits.remove(source);
    }

    /// Drop sources whose every hit has aged out of the window.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.hits.retain(|_, hits| {
            hits.retain(|t| now.duration_since(*t) < window);
            !hits.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_the_limit_is_allowed() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.at_limit("1.2.3.4").is_none());
        limiter.record("1.2.3.4");
        limiter.record("1.2.3.4");
        assert!(limiter.at_limit("1.2.3.4").is_none());
    }

    #[test]
    fn hitting_the_limit_blocks_with_a_retry_hint() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.record("1.2.3.4");
        }
        let retry = limiter.at_limit("1.2.3.4").expect("blocked");
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn sources_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.record("1.2.3.4");
        assert!(limiter.at_limit("1.2.3.4").is_some());
        assert!(limiter.at_limit("5.6.7.8").is_none());
    }

    #[test]
    fn reset_clears_a_source() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.record("1.2.3.4");
        assert!(limiter.at_limit("1.2.3.4").is_some());
        limiter.reset("1.2.3.4");
        assert!(limiter.at_limit("1.2.3.4").is_none());
    }

    #[test]
    fn the_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.record("1.2.3.4");
        limiter.record("1.2.3.4");
        assert!(limiter.at_limit("1.2.3.4").is_some());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.at_limit("1.2.3.4").is_none());
        assert_eq!(limiter.record("1.2.3.4"), 1);
    }

    #[test]
    fn prune_drops_stale_sources() {
        let limiter = RateLimiter::new(2, Duration::from_millis(10));
        limiter.record("1.2.3.4");
        std::thread::sleep(Duration::from_millis(30));
        limiter.prune();
        assert!(limiter.hits.is_empty());
    }
}
