//! Bounded retry with exponential backoff.
//!
//! An explicit schedule rather than an open-ended reconnect loop: a fixed
//! attempt budget, doubling delays with jitter, and a terminal exhausted
//! state that surfaces the last error. Only read paths go through this;
//! order placement must not.

use crate::error::{MarlinError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Exponential backoff schedule with an attempt budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u8,
    max_attempts: u8,
    base_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u8, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    /// Delay before the next retry, or None once the budget is exhausted.
    ///
    /// Delays double per attempt with up to 25% random jitter so synchronized
    /// clients do not retry in lockstep.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.max_attempts {
            return None;
        }

        let backoff = self.base_delay * (1u32 << self.attempt);
        self.attempt += 1;

        let jitter_ms = (backoff.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        Some(backoff + jitter)
    }
}

/// Run a read operation with bounded retries.
///
/// Each failure logs a warning and waits out the backoff; when the budget is
/// exhausted the last error is wrapped as a broker communication failure.
pub async fn with_retry<T, F, Fut>(label: &str, mut backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "{label} failed (attempt {}): {e}. Retrying in {:?}",
                        backoff.attempt(),
                        delay
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(MarlinError::BrokerCommunication(format!(
                        "{label} failed after {} attempts: {e}",
                        backoff.attempt() + 1
                    )));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn schedule_doubles_and_terminates() {
        let mut backoff = Backoff::new(4, Duration::from_millis(100));

        let d1 = backoff.next_delay().unwrap();
        let d2 = backoff.next_delay().unwrap();
        let d3 = backoff.next_delay().unwrap();
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());

        // Base doubles each attempt; jitter adds at most 25%
        assert!(d1 >= Duration::from_millis(100) && d1 <= Duration::from_millis(125));
        assert!(d2 >= Duration::from_millis(200) && d2 <= Duration::from_millis(250));
        assert!(d3 >= Duration::from_millis(400) && d3 <= Duration::from_millis(500));
    }

    #[test]
    fn single_attempt_budget_never_sleeps() {
        let mut backoff = Backoff::new(1, Duration::from_millis(100));
        assert!(backoff.next_delay().is_none());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            "test read",
            Backoff::new(5, Duration::from_millis(1)),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MarlinError::BrokerCommunication("flaky".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(
            "doomed read",
            Backoff::new(3, Duration::from_millis(1)),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MarlinError::BrokerCommunication("down".to_string())) }
            },
        )
        .await;

        assert!(matches!(result, Err(MarlinError::BrokerCommunication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
