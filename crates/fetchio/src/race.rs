// Mirror racing: the same request issued to every mirror concurrently,
// first success wins.
//
// Losing in-flight attempts are not cancelled; they run to completion and
// their results are discarded. The result channel is bounded to the mirror
// count, so the task set is bounded and sends never block.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::FetchError;
use crate::error::{MirrorFailure, truncate};

/// Per-mirror failure reasons are truncated to keep aggregate errors readable.
const FAILURE_EXCERPT_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct RacePolicy {
    /// Upper bound on one mirror's attempt, so a hung mirror cannot stall
    /// resolution.
    pub attempt_timeout: Duration,
}

impl Default for RacePolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

/// The first successful mirror result, plus the failures observed while
/// waiting for it.
#[derive(Debug)]
pub struct RaceWin<T> {
    pub endpoint: String,
    pub value: T,
    pub failures: Vec<MirrorFailure>,
}

/// Issue `operation` against every endpoint concurrently and return the
/// first success by completion time. If every mirror fails, the error
/// names each endpoint with its (truncated) failure reason.
pub async fn race_all<F, Fut, T>(
    policy: &RacePolicy,
    endpoints: &[String],
    operation: F,
) -> Result<RaceWin<T>, FetchError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    if endpoints.is_empty() {
        return Err(FetchError::source_exhausted("no mirrors configured"));
    }

    let (tx, mut rx) = mpsc::channel(endpoints.len());
    let attempt_timeout = policy.attempt_timeout;

    for endpoint in endpoints {
        let fut = operation(endpoint.clone());
        let endpoint = endpoint.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(attempt_timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    operation: "mirror request",
                    waited: attempt_timeout,
                }),
            };
            // The coordinator may have returned already; a closed channel
            // just means this attempt lost the race.
            let _ = tx.send((endpoint, outcome)).await;
        });
    }
    drop(tx);

    let mut failures = Vec::with_capacity(endpoints.len());
    for _ in 0..endpoints.len() {
        let Some((endpoint, outcome)) = rx.recv().await else {
            break;
        };
        match outcome {
            Ok(value) => {
                info!(endpoint = %endpoint, "Mirror answered first");
                return Ok(RaceWin {
                    endpoint,
                    value,
                    failures,
                });
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "Mirror failed");
                failures.push(MirrorFailure {
                    endpoint,
                    reason: truncate(&err.to_string(), FAILURE_EXCERPT_LEN),
                });
            }
        }
    }

    Err(FetchError::MirrorsExhausted { failures })
}
