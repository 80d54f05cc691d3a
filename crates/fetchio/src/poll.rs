// Server-side conversion jobs: submit once, then poll a status endpoint on
// a fixed interval until a terminal state or the overall wait budget runs
// out. A failed status check is transient and retried on the next tick.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::FetchError;

/// A submitted job: its id and the endpoint to poll for status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub status_url: String,
}

/// Payload of a finished job: where the prepared file lives, plus the
/// upstream's labels for progress display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub url: String,
    pub name: String,
    pub artist: String,
}

/// Job lifecycle. Transitions are forward-only: `Submitted` →
/// `Processing`* → `Done` | `Error`; the timeout terminal state is the
/// poller's `Timeout` error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Processing(String),
    Done(CompletedJob),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Poll `check` until the job reaches a terminal state.
///
/// The most recent `Processing` text is handed to `on_processing` so a
/// progress collaborator can display it.
pub async fn poll_until_terminal<F, Fut>(
    policy: &PollPolicy,
    mut check: F,
    mut on_processing: impl FnMut(&str),
) -> Result<CompletedJob, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobStatus, FetchError>>,
{
    let start = Instant::now();
    loop {
        match check().await {
            Ok(JobStatus::Done(job)) => return Ok(job),
            Ok(JobStatus::Error(message)) => {
                let reason = if message.is_empty() {
                    "Unknown error".to_string()
                } else {
                    message
                };
                return Err(FetchError::JobFailed { reason });
            }
            Ok(JobStatus::Processing(text)) => on_processing(&text),
            Ok(JobStatus::Submitted) => {}
            Err(err) => {
                debug!(error = %err, "Status check failed, retrying on next tick");
            }
        }

        tokio::time::sleep(policy.interval).await;
        if start.elapsed() >= policy.max_wait {
            return Err(FetchError::Timeout {
                operation: "job polling",
                waited: start.elapsed(),
            });
        }
    }
}
