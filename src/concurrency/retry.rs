//! Exponential backoff with jitter between retry attempts

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay schedule for retries: `base * 2^(attempt - 1)`, capped at `max`.
///
/// With jitter enabled the actual delay is drawn uniformly from
/// `[delay / 2, delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Upper bound of the delay before retry number `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay to wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }

        let ceiling_ms = ceiling.as_millis() as u64;
        let floor_ms = ceiling_ms / 2;
        let jittered = rand::thread_rng().gen_range(floor_ms..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Sleep for the delay of `attempt`, returning `false` if cancelled first.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        self.wait_bounded(attempt, self.max, cancel).await
    }

    /// Like [`wait`](Self::wait), but never sleeps longer than `limit`.
    pub async fn wait_bounded(&self, attempt: u32, limit: Duration, cancel: &CancellationToken) -> bool {
        let delay = self.delay(attempt).min(limit);
        tracing::trace!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
