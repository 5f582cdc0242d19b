//! Sliding-window rate limiter for data reads.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Caps requests to `max_requests` per sliding `window`.
///
/// Old timestamps are pruned as the window slides; `acquire` waits until the
/// oldest in-window request ages out when the budget is spent.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: VecDeque::with_capacity(max_requests),
        }
    }

    fn prune(&mut self, now: Instant) {
        // Early in process lifetime the window may predate the clock's epoch
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(front) = self.timestamps.front() {
            if *front <= cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a slot without waiting. Returns false when the window is full.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.prune(now);

        if self.timestamps.len() >= self.max_requests {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    /// Take a slot, waiting for the window to slide if necessary.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.prune(now);

            if self.timestamps.len() < self.max_requests {
                self.timestamps.push_back(now);
                return;
            }

            // Wait for the oldest in-window request to age out
            let oldest = *self.timestamps.front().expect("window is full");
            let wakeup = oldest + self.window;
            debug!("Rate limit reached, waiting {:?}", wakeup - now);
            sleep_until(wakeup).await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_enforced_within_window() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(10));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // After the window passes, the budget refills
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_a_slot() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(5));
        limiter.acquire().await;

        let before = Instant::now();
        limiter.acquire().await;
        // Paused clock: the sleep advanced time by the full window
        assert!(Instant::now() - before >= Duration::from_secs(5));
    }
}
