//! Request throttle enforcing a minimum delay between API calls.
//!
//! The TimeTree web app spaces its own requests by roughly 100 ms; mirroring
//! that pacing keeps the backend from rate limiting us. One throttle instance
//! is shared by every request going through a client.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Default spacing between request departures.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Enforces a minimum interval between consecutive request departures.
///
/// Only the departure *time* is serialized; requests may be in flight
/// concurrently once released.
pub struct RequestThrottle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until the minimum interval has elapsed since the last request.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let throttle = RequestThrottle::new(Duration::from_millis(100));
        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_consecutive_acquires_are_spaced() {
        let throttle = RequestThrottle::new(Duration::from_millis(50));
        throttle.acquire().await;
        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_no_wait_after_interval_elapsed() {
        let throttle = RequestThrottle::new(Duration::from_millis(20));
        throttle.acquire().await;
        sleep(Duration::from_millis(40)).await;
        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        use std::sync::Arc;

        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(30)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let t = Arc::clone(&throttle);
            handles.push(tokio::spawn(async move { t.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Three departures, two enforced gaps.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
