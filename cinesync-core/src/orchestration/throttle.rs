use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Pool-wide backoff. Any worker that sees a throttle response extends the
/// pause; every worker checks the gate before its next catalog call.
#[derive(Debug, Default)]
pub struct ThrottleGate {
    paused_until: Mutex<Option<Instant>>,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause all workers for at least `duration` from now. Overlapping
    /// pauses never shorten one another.
    pub async fn pause(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut paused = self.paused_until.lock().await;
        if paused.is_none_or(|current| current < until) {
            *paused = Some(until);
        }
    }

    pub async fn paused_until(&self) -> Option<Instant> {
        let paused = *self.paused_until.lock().await;
        paused.filter(|until| *until > Instant::now())
    }

    /// Block while a pause is active. Returns `false` if cancelled while
    /// waiting.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        // Re-check after sleeping: the pause may have been extended meanwhile.
        while let Some(until) = self.paused_until().await {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = sleep_until(until) => {}
            }
        }
        !cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn open_gate_does_not_block() {
        let gate = ThrottleGate::new();
        let start = Instant::now();
        assert!(gate.wait(&CancellationToken::new()).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_for_the_longest_pause() {
        let gate = ThrottleGate::new();
        gate.pause(Duration::from_secs(5)).await;
        gate.pause(Duration::from_secs(1)).await;

        let start = Instant::now();
        assert!(gate.wait(&CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(gate.paused_until().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_pause() {
        let gate = ThrottleGate::new();
        gate.pause(Duration::from_secs(60)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!gate.wait(&cancel).await);
    }
}
