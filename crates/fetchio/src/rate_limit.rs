// Rolling-window rate limiter for throttled resolution APIs.
//
// The budget is a plain value owned by exactly one resolver instance; runs
// for different tracks each carry their own limiter state. The window
// rolls: admission looks at the completions of the last `window`, not at
// fixed window boundaries, so a burst straddling a boundary cannot exceed
// the quota.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Per-upstream quota: at most `max_calls_per_window` calls per rolling
/// `window`, with at least `min_spacing` between consecutive calls.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub max_calls_per_window: u32,
    pub window: Duration,
    pub min_spacing: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: RatePolicy,
    /// Completion times of the calls still inside the rolling window,
    /// oldest first.
    completions: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        let capacity = policy.max_calls_per_window as usize;
        Self {
            policy,
            completions: VecDeque::with_capacity(capacity),
        }
    }

    /// Block until the policy permits another call, then record it.
    ///
    /// Infallible; the only effect is elapsed time.
    pub async fn acquire(&mut self) {
        self.prune(Instant::now());

        if self.completions.len() >= self.policy.max_calls_per_window as usize
            && let Some(&oldest) = self.completions.front()
        {
            let wait = self
                .policy
                .window
                .saturating_sub(Instant::now().duration_since(oldest));
            if !wait.is_zero() {
                debug!(
                    wait_ms = wait.as_millis() as u64,
                    "Call quota reached, waiting for the oldest call to age out"
                );
                tokio::time::sleep(wait).await;
            }
            self.prune(Instant::now());
        }

        if let Some(&last) = self.completions.back() {
            let since_last = Instant::now().duration_since(last);
            if since_last < self.policy.min_spacing {
                let wait = self.policy.min_spacing - since_last;
                debug!(wait_ms = wait.as_millis() as u64, "Spacing calls to upstream");
                tokio::time::sleep(wait).await;
            }
        }

        self.completions.push_back(Instant::now());
    }

    /// Drop completions that have aged out of the rolling window.
    fn prune(&mut self, now: Instant) {
        while self
            .completions
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.policy.window)
        {
            self.completions.pop_front();
        }
    }
}
