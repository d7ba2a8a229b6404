use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check for one client and route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Sliding-window limiter keyed by client and route.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, VecDeque<Instant>>>,
    swept_at: Arc<Mutex<Instant>>,
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
            swept_at: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn check(&self, client: &str, route: &str) -> RateDecision {
        self.check_at(client, route, Instant::now())
    }

    fn check_at(&self, client: &str, route: &str, now: Instant) -> RateDecision {
        let decision = self.admit(format!("{client}:{route}"), now);
        self.sweep(now);
        decision
    }

    fn admit(&self, key: String, now: Instant) -> RateDecision {
        let mut entry = self.buckets.entry(key).or_default();
        while entry
            .front()
            .is_some_and(|seen| now.duration_since(*seen) >= self.window)
        {
            entry.pop_front();
        }

        let used = u32::try_from(entry.len()).unwrap_or(u32::MAX);
        if used >= self.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
            };
        }

        entry.push_back(now);
        RateDecision {
            allowed: true,
            remaining: self.max_requests - used - 1,
        }
    }

    /// Drop buckets whose newest request has left the window, at most once per window.
    fn sweep(&self, now: Instant) {
        let Ok(mut swept_at) = self.swept_at.try_lock() else {
            return;
        };
        if now.duration_since(*swept_at) < self.window {
            return;
        }
        *swept_at = now;
        drop(swept_at);

        self.buckets.retain(|_, seen| {
            seen.back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_up_to_the_limit() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 2);
        let now = Instant::now();

        assert_eq!(
            limiter.check_at("10.0.0.1", "/nearby", now),
            RateDecision {
                allowed: true,
                remaining: 1
            }
        );
        assert!(limiter.check_at("10.0.0.1", "/nearby", now).allowed);
        assert!(!limiter.check_at("10.0.0.1", "/nearby", now).allowed);
        assert!(limiter.check_at("10.0.0.2", "/nearby", now).allowed);
        assert!(limiter.check_at("10.0.0.1", "/details", now).allowed);
    }

    #[test]
    fn expired_requests_free_their_slots() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(1), 1);
        let start = Instant::now();

        assert!(limiter.check_at("client", "/nearby", start).allowed);
        assert!(!limiter.check_at("client", "/nearby", start).allowed);
        assert!(
            limiter
                .check_at("client", "/nearby", start + Duration::from_secs(1))
                .allowed
        );
    }

    #[test]
    fn idle_clients_are_evicted_after_a_window() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(1), 5);
        let start = Instant::now();

        assert!(limiter.check_at("gone", "/nearby", start).allowed);
        assert!(limiter.check_at("gone", "/details", start).allowed);
        assert_eq!(limiter.buckets.len(), 2);

        let later = start + Duration::from_secs(2);
        assert!(limiter.check_at("active", "/nearby", later).allowed);
        assert_eq!(limiter.buckets.len(), 1);
        assert!(limiter.buckets.contains_key("active:/nearby"));
    }
}
