//! Global spawn rate limiting
//!
//! The limiter only remembers when the last process started. Checking and
//! recording are separate steps: a request checks with
//! [`SpawnRateLimiter::try_acquire`], and records with
//! [`SpawnRateLimiter::record_start`] once its process is actually running.
//! Two requests racing through the check can therefore both be admitted;
//! the limiter is a coarse throttle, not a single-admission gate.

use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Allows at most one process start per interval
#[derive(Debug)]
pub struct SpawnRateLimiter {
    interval: Duration,
    last_start: RwLock<Option<Instant>>,
}

impl SpawnRateLimiter {
    /// A zero interval disables limiting
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: RwLock::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Whether a process may start now. Does not change any state.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let last_start = *self
            .last_start
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        match last_start {
            // An interval too long to represent never elapses.
            Some(last) => last
                .checked_add(self.interval)
                .is_some_and(|next| now >= next),
            None => true,
        }
    }

    /// Remember that a process successfully started
    pub fn record_start(&self) {
        self.record_start_at(Instant::now());
    }

    pub fn record_start_at(&self, now: Instant) {
        *self
            .last_start
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(now);
    }

    pub fn last_start(&self) -> Option<Instant> {
        *self
            .last_start
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_is_allowed() {
        let limiter = SpawnRateLimiter::new(Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(limiter.last_start().is_none());
    }

    #[test]
    fn test_zero_interval_disables_limiting() {
        let limiter = SpawnRateLimiter::new(Duration::ZERO);
        assert!(!limiter.is_enabled());
        let now = Instant::now();
        limiter.record_start_at(now);
        assert!(limiter.try_acquire_at(now));
    }

    #[test]
    fn test_rejected_attempts_do_not_move_the_window() {
        let limiter = SpawnRateLimiter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        limiter.record_start_at(t0);

        assert!(!limiter.try_acquire_at(t0 + Duration::from_millis(100)));
        assert!(!limiter.try_acquire_at(t0 + Duration::from_millis(900)));
        assert_eq!(limiter.last_start(), Some(t0));
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_rejection_follows_last_accepted_start() {
        let interval = Duration::from_millis(300);
        let limiter = SpawnRateLimiter::new(interval);
        let base = Instant::now();
        let arrivals_ms = [0u64, 100, 250, 300, 320, 599, 600, 601, 1_000, 1_250];

        let mut last_accepted: Option<Instant> = None;
        for ms in arrivals_ms {
            let at = base + Duration::from_millis(ms);
            let expected = match last_accepted {
                Some(last) => at >= last + interval,
                None => true,
            };
            let allowed = limiter.try_acquire_at(at);
            assert_eq!(allowed, expected, "arrival at {ms}ms");
            if allowed {
                limiter.record_start_at(at);
                last_accepted = Some(at);
            }
        }
    }

    #[test]
    fn test_check_without_record_admits_both() {
        let limiter = SpawnRateLimiter::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now + Duration::from_millis(1)));
    }

    #[test]
    fn test_unrepresentable_interval_rejects_without_panicking() {
        let limiter = SpawnRateLimiter::new(Duration::MAX);
        limiter.record_start();
        assert!(!limiter.try_acquire());
    }
}
