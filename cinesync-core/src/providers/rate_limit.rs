use std::fmt;
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Spaces requests evenly so the whole worker pool stays under a fixed
/// requests-per-second ceiling. Burst is one, so idle time never turns into
/// a spike of back-to-back requests.
pub struct RequestPacer {
    requests_per_second: u32,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPacer")
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}

impl RequestPacer {
    /// `requests_per_second == 0` disables pacing.
    pub fn per_second(requests_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_second).map(|rate| {
            RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN))
        });
        Self {
            requests_per_second,
            limiter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[tokio::test]
    async fn requests_are_spaced_by_interval() {
        let pacer = RequestPacer::per_second(20);
        assert!(pacer.is_enabled());

        let start = Instant::now();
        for _ in 0..3 {
            pacer.acquire().await;
        }
        // First request is immediate, the next two wait ~50ms each.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[tokio::test]
    async fn idle_time_is_not_banked_into_a_burst() {
        let pacer = RequestPacer::per_second(20);
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let start = Instant::now();
        pacer.acquire().await;
        pacer.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
    }

    #[tokio::test]
    async fn zero_rate_disables_pacing() {
        let pacer = RequestPacer::per_second(0);
        assert!(!pacer.is_enabled());
        let start = Instant::now();
        for _ in 0..100 {
            pacer.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
