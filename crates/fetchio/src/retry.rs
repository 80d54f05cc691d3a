// Bounded retry for a single upstream call.
//
// Only explicit rate-limit responses are retried, after a fixed cooldown.
// Other failures return immediately: a down upstream is handed to the
// caller's fallback/racing layer instead of being hammered here.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed cooldown slept before re-issuing a rate-limited call.
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(15),
        }
    }
}

/// Execute `operation` until it succeeds, fails with a non-throttle error,
/// or exhausts `max_attempts` while being throttled.
///
/// The closure receives the current attempt number (0-indexed).
pub async fn execute<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, FetchError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                warn!(
                    attempt,
                    max = policy.max_attempts,
                    cooldown_ms = policy.cooldown.as_millis() as u64,
                    error = %err,
                    "Rate limited, cooling down before retry"
                );
                tokio::time::sleep(policy.cooldown).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            cooldown: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let attempts = AtomicU32::new(0);
        let result = execute(&fast_policy(3), |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Ok(7u32) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_rate_limited_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = execute(&fast_policy(3), |attempt| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt == 0 {
                    Err(FetchError::RateLimited {
                        operation: "lookup",
                    })
                } else {
                    Ok("url".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "url");
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn non_throttle_errors_fail_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = execute(&fast_policy(5), |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async {
                Err(FetchError::http_status(
                    StatusCode::BAD_GATEWAY,
                    "http://upstream",
                    "lookup",
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_under_sustained_throttling() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = execute(&fast_policy(3), |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async {
                Err(FetchError::RateLimited {
                    operation: "lookup",
                })
            }
        })
        .await;
        assert!(matches!(result, Err(FetchError::RateLimited { .. })));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }
}
